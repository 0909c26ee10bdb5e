//! picloop — shared photo slideshow service
//!
//! Guests contribute photos through a chat-bot intake pipeline; a fleet
//! of slideshow viewers polls the rotation API to decide what to show
//! next. The display rotation engine serves three tiers in strict
//! priority order: freshly contributed images first (so contributors
//! see immediate confirmation on every screen), then the round-robin
//! sweep over images not yet shown this cycle, and once everything has
//! been shown, the cycle resets and the slideshow starts over from the
//! oldest image — an endless loop with no manual curation.
//!
//! ## Architecture
//!
//! ```text
//! Chat intake                 S3 Bucket                 PostgreSQL
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ POST /intake │──────────▶│ images/      │          │ images       │
//! └──────────────┘           │   {date}/    │          └──────────────┘
//!        │                   └──────────────┘                 ▲
//!        │                          │                         │
//!        ▼                          │ presigned URLs          │
//! ┌──────────────┐                  ▼                         │
//! │ Intake       │           ┌──────────────┐                 │
//! │ Service      │──────────▶│ Rotation     │◀────────────────┘
//! └──────────────┘           │ Engine       │
//!                            └──────────────┘
//!                                   ▲
//!                      GET /images  │  POST /images/displayed
//!                            ┌──────────────┐
//!                            │ Slideshow    │
//!                            │ pollers      │
//!                            └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod config;
pub mod image_store;
pub mod intake;
pub mod rotation;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{AppState, ImageResponse};
pub use blob_store::{BlobStore, BlobStoreError, S3BlobStore, StoredBlob};
pub use config::Config;
pub use image_store::{
    ImageId, ImageRecord, ImageRecordStore, NewImageRecord, PgImageStore, RotationState,
    StoreError,
};
pub use intake::{IntakeError, IntakeService};
pub use rotation::{DisplayImage, EngineError, RotationEngine};
