use crate::blob_store::{BlobStore, BlobStoreError};
use crate::image_store::{ImageRecord, ImageRecordStore, NewImageRecord, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Errors surfaced by the intake pipeline
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("blob upload failed: {0}")]
    Upload(#[from] BlobStoreError),

    /// The blob landed in the object store but no record points at it.
    /// Callers can retry record creation instead of re-uploading.
    #[error("record creation failed, blob {blob_key} orphaned: {source}")]
    OrphanedBlob {
        blob_key: String,
        #[source]
        source: StoreError,
    },
}

/// Image intake pipeline: persist the blob, then create exactly one
/// Fresh record pointing at it.
pub struct IntakeService {
    records: Arc<dyn ImageRecordStore>,
    blobs: Arc<dyn BlobStore>,
    blob_prefix: String,
}

impl IntakeService {
    /// Create an intake service over the given collaborators.
    pub fn new(
        records: Arc<dyn ImageRecordStore>,
        blobs: Arc<dyn BlobStore>,
        blob_prefix: String,
    ) -> Self {
        Self {
            records,
            blobs,
            blob_prefix,
        }
    }

    /// Intake one image: upload the blob, then insert a Fresh record.
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn intake(
        &self,
        content_type: &str,
        data: Vec<u8>,
        suggested_name: Option<&str>,
    ) -> Result<ImageRecord, IntakeError> {
        let key = blob_key(&self.blob_prefix, content_type, suggested_name, Utc::now());

        let blob = self.blobs.put(&key, content_type, data).await?;

        let record = self
            .records
            .insert(NewImageRecord {
                blob_key: blob.key.clone(),
                uploaded_at: blob.uploaded_at,
            })
            .await
            .map_err(|source| {
                warn!(blob_key = %blob.key, "Record creation failed after upload, blob orphaned");
                IntakeError::OrphanedBlob {
                    blob_key: blob.key.clone(),
                    source,
                }
            })?;

        info!(id = record.id, blob_key = %record.blob_key, "Image intaken");
        metrics::counter!("picloop.images.intaken").increment(1);

        Ok(record)
    }
}

/// Derive a date-partitioned object key.
///
/// Format: `{prefix}/{date}/{stem}_{uuid}.{ext}` — date partition for
/// lifecycle policies, uuid for uniqueness, stem from the suggested
/// name when one was given, upload time otherwise.
fn blob_key(
    prefix: &str,
    content_type: &str,
    suggested_name: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let date = now.format("%Y-%m-%d");
    let ext = extension_for(content_type);
    let unique = Uuid::new_v4().simple();

    match suggested_name.map(sanitize_name).filter(|stem| !stem.is_empty()) {
        Some(stem) => format!("{prefix}/{date}/{stem}_{unique}.{ext}"),
        None => format!(
            "{prefix}/{date}/{time}_{unique}.{ext}",
            time = now.format("%H%M%S%3f")
        ),
    }
}

/// Sanitize a name for use as a key component
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// File extension for an image mime type
fn extension_for(content_type: &str) -> &'static str {
    match content_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}
