use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// A blob persisted in the object store
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Stable object key the blob is reachable under
    pub key: String,
    /// When the upload completed
    pub uploaded_at: DateTime<Utc>,
}

/// Errors surfaced by the object store
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("blob upload failed: {0}")]
    Upload(String),

    #[error("failed to generate retrieval URL: {0}")]
    Presign(String),
}

/// Narrow object-store contract: persist a blob under a key, and
/// produce a time-limited retrieval URL for a stored key.
///
/// Retrieval URLs are leased capabilities — they expire independently
/// of record state and must be regenerated per response, never cached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its stable key plus upload timestamp.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<StoredBlob, BlobStoreError>;

    /// Produce a presigned GET URL valid for the configured window.
    async fn presign_get(&self, key: &str) -> Result<String, BlobStoreError>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    url_expiry: Duration,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            url_expiry: Duration::from_secs(config.presigned_url_expiry_secs),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(key = %key, size_bytes = data.len()))]
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<StoredBlob, BlobStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobStoreError::Upload(e.to_string()))?;

        let uploaded_at = Utc::now();

        info!(key = %key, "Blob uploaded to S3");
        metrics::counter!("picloop.blobs.uploaded").increment(1);

        Ok(StoredBlob {
            key: key.to_string(),
            uploaded_at,
        })
    }

    async fn presign_get(&self, key: &str) -> Result<String, BlobStoreError> {
        let presigning_config = PresigningConfig::expires_in(self.url_expiry)
            .map_err(|e| BlobStoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| BlobStoreError::Presign(e.to_string()))?;

        debug!(key = %key, "Presigned retrieval URL generated");

        Ok(presigned.uri().to_string())
    }
}
