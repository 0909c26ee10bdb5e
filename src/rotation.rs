use crate::blob_store::{BlobStore, BlobStoreError};
use crate::image_store::{ImageId, ImageRecord, ImageRecordStore, RotationState, StoreError};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// A display-ready image handed to a slideshow poller
#[derive(Debug, Clone)]
pub struct DisplayImage {
    /// Record ID, echoed back by the acknowledgment call
    pub id: ImageId,
    /// Time-limited retrieval URL, presigned for this response
    pub file_url: String,
    /// Whether the record is still Fresh (never acknowledged)
    pub is_new: bool,
    /// Record creation time
    pub created_at: DateTime<Utc>,
}

/// Errors surfaced by the rotation engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("record store failure: {0}")]
    Store(#[from] StoreError),

    #[error("image record {0} not found")]
    RecordNotFound(ImageId),

    #[error("object store failure: {0}")]
    Blob(#[from] BlobStoreError),
}

/// Display rotation engine.
///
/// Decides, on every poll, which stored images a viewer sees next.
/// Three mutually exclusive tiers in strict priority order — the first
/// non-empty tier wins:
///
/// 1. Fresh records, upload order: just-contributed images jump the
///    queue on every viewer.
/// 2. Pending records, upload order: the round-robin sweep over images
///    not yet shown this cycle.
/// 3. Exhaustion: every Shown record is reset to Pending in one bulk
///    step and the whole set is served again from the oldest image.
///
/// The engine is stateless between calls; all state lives in the
/// record store. Concurrent pollers may each trigger the reset — it is
/// conditional and idempotent, so redundant runs are harmless.
pub struct RotationEngine {
    records: Arc<dyn ImageRecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl RotationEngine {
    /// Create an engine over the given collaborators.
    pub fn new(records: Arc<dyn ImageRecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    /// Compute the next batch of images to display.
    #[instrument(skip(self))]
    pub async fn next_batch(&self) -> Result<Vec<DisplayImage>, EngineError> {
        let fresh = self.records.list_fresh().await?;
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "Serving fresh tier");
            metrics::counter!("picloop.batches.fresh").increment(1);
            return self.shape(fresh).await;
        }

        let pending = self.records.list_pending().await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Serving pending tier");
            metrics::counter!("picloop.batches.pending").increment(1);
            return self.shape(pending).await;
        }

        // Cycle exhausted: bulk reset + full read as one store operation.
        let all = self.records.reset_shown_and_list_all().await?;
        info!(count = all.len(), "All images shown, restarting rotation cycle");
        metrics::counter!("picloop.rotation.resets").increment(1);
        self.shape(all).await
    }

    /// Mark one image as displayed: Fresh/Pending -> Shown.
    ///
    /// Idempotent — re-acknowledging a Shown record matches the row
    /// again and leaves the same final state.
    #[instrument(skip(self))]
    pub async fn acknowledge(&self, id: ImageId) -> Result<(), EngineError> {
        if !self.records.mark_shown(id).await? {
            return Err(EngineError::RecordNotFound(id));
        }

        debug!(id, "Image acknowledged as displayed");
        metrics::counter!("picloop.images.acknowledged").increment(1);
        Ok(())
    }

    /// Shape records for display. URLs are presigned here, per
    /// response — they expire on their own clock and are never cached.
    async fn shape(&self, records: Vec<ImageRecord>) -> Result<Vec<DisplayImage>, EngineError> {
        let urls = try_join_all(
            records
                .iter()
                .map(|record| self.blobs.presign_get(&record.blob_key)),
        )
        .await?;

        Ok(records
            .into_iter()
            .zip(urls)
            .map(|(record, file_url)| DisplayImage {
                id: record.id,
                file_url,
                is_new: record.rotation_state() == RotationState::Fresh,
                created_at: record.created_at,
            })
            .collect())
    }
}
