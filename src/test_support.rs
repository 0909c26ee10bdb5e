//! Shared test doubles and fixtures.
//!
//! `MemoryStore` mirrors the ordering and transition semantics of the
//! Postgres store so policy tests run against the same contract the
//! real store honors.

use crate::image_store::{
    ImageId, ImageRecord, ImageRecordStore, NewImageRecord, RotationState, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

/// Deterministic base timestamp for fixtures
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
}

/// Build a record fixture; `offset_secs` spaces the upload times.
pub fn record(id: ImageId, offset_secs: i64, state: RotationState) -> ImageRecord {
    let uploaded_at = t0() + Duration::seconds(offset_secs);
    let (is_new, is_displayed) = match state {
        RotationState::Fresh => (true, false),
        RotationState::Pending => (false, false),
        RotationState::Shown => (false, true),
    };

    ImageRecord {
        id,
        blob_key: format!("images/2026-08-01/{id}.jpg"),
        uploaded_at,
        is_new,
        is_displayed,
        created_at: uploaded_at,
        updated_at: uploaded_at,
    }
}

/// In-memory image record store
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ImageRecord>>,
}

impl MemoryStore {
    /// Create a store pre-populated with the given rows.
    pub fn seeded(rows: Vec<ImageRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    /// Copy of the current rows, in insertion order.
    pub fn snapshot(&self) -> Vec<ImageRecord> {
        self.rows.lock().unwrap().clone()
    }

    fn in_display_order(mut rows: Vec<ImageRecord>) -> Vec<ImageRecord> {
        rows.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }
}

#[async_trait]
impl ImageRecordStore for MemoryStore {
    async fn insert(&self, record: NewImageRecord) -> Result<ImageRecord, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.iter().map(|row| row.id).max().unwrap_or(0) + 1;
        let row = ImageRecord {
            id,
            blob_key: record.blob_key,
            uploaded_at: record.uploaded_at,
            is_new: true,
            is_displayed: false,
            created_at: record.uploaded_at,
            updated_at: record.uploaded_at,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_fresh(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = self.snapshot();
        Ok(Self::in_display_order(
            rows.into_iter()
                .filter(|row| row.rotation_state() == RotationState::Fresh)
                .collect(),
        ))
    }

    async fn list_pending(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = self.snapshot();
        Ok(Self::in_display_order(
            rows.into_iter()
                .filter(|row| row.rotation_state() == RotationState::Pending)
                .collect(),
        ))
    }

    async fn mark_shown(&self, id: ImageId) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.is_new = false;
                row.is_displayed = true;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_shown_and_list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut().filter(|row| row.is_displayed) {
            row.is_displayed = false;
            row.updated_at = Utc::now();
        }
        Ok(Self::in_display_order(rows.clone()))
    }
}

/// Store whose every operation fails, for error-path tests.
pub struct FailingStore;

impl FailingStore {
    fn read_error() -> StoreError {
        StoreError::Read(sqlx::Error::PoolClosed)
    }

    fn write_error() -> StoreError {
        StoreError::Write(sqlx::Error::PoolClosed)
    }
}

#[async_trait]
impl ImageRecordStore for FailingStore {
    async fn insert(&self, _record: NewImageRecord) -> Result<ImageRecord, StoreError> {
        Err(Self::write_error())
    }

    async fn list_fresh(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Err(Self::read_error())
    }

    async fn list_pending(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Err(Self::read_error())
    }

    async fn mark_shown(&self, _id: ImageId) -> Result<bool, StoreError> {
        Err(Self::write_error())
    }

    async fn reset_shown_and_list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Err(Self::write_error())
    }
}
