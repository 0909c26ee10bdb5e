use crate::config::DatabaseConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Opaque image record identifier, assigned by the store at creation
pub type ImageId = i64;

/// Stored image metadata
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Unique record ID
    pub id: ImageId,
    /// S3 object key for the image blob
    pub blob_key: String,
    /// Upload timestamp; defines display sequencing order
    pub uploaded_at: DateTime<Utc>,
    /// True from creation until the record is first acknowledged
    pub is_new: bool,
    /// True once shown in the current rotation cycle (skip until reset)
    pub is_displayed: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

/// Rotation state of a record, derived from the flag pair.
///
/// Call sites match on this instead of re-deriving boolean
/// combinations, so adding a state later touches one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// Newly intaken, never acknowledged
    Fresh,
    /// Acknowledged, eligible for normal rotation
    Pending,
    /// Already displayed this cycle, excluded until reset
    Shown,
}

impl ImageRecord {
    /// Derive the rotation state from the stored flags.
    pub fn rotation_state(&self) -> RotationState {
        if self.is_new {
            RotationState::Fresh
        } else if self.is_displayed {
            RotationState::Shown
        } else {
            RotationState::Pending
        }
    }
}

/// Fields for a new image record; flags start at Fresh
#[derive(Debug, Clone)]
pub struct NewImageRecord {
    /// S3 object key of the uploaded blob
    pub blob_key: String,
    /// Blob upload timestamp
    pub uploaded_at: DateTime<Utc>,
}

/// Errors surfaced by the record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(#[source] sqlx::Error),

    #[error("store write failed: {0}")]
    Write(#[source] sqlx::Error),
}

/// Narrow record-store contract consumed by the rotation engine and
/// the intake adapter.
///
/// Reads are ordered `uploaded_at ASC, id ASC` — ids are assigned in
/// insertion order, so ties on `uploaded_at` stay stable.
/// `reset_shown_and_list_all` is a single store-level operation: the
/// bulk reset must be applied to every qualifying row before the
/// post-reset read executes, never interleaved with it.
#[async_trait]
pub trait ImageRecordStore: Send + Sync {
    /// Insert a new Fresh record and return it with its assigned id.
    async fn insert(&self, record: NewImageRecord) -> Result<ImageRecord, StoreError>;

    /// All Fresh records in display order.
    async fn list_fresh(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// All Pending records in display order.
    async fn list_pending(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// Move one record to Shown. Returns false when no row matched.
    async fn mark_shown(&self, id: ImageId) -> Result<bool, StoreError>;

    /// Reset every Shown record to Pending, then return the full
    /// record set in display order, as one atomic unit.
    async fn reset_shown_and_list_all(&self) -> Result<Vec<ImageRecord>, StoreError>;
}

/// PostgreSQL-backed image record store
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    /// Create a new store with a connection pool.
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImageRecordStore for PgImageStore {
    #[instrument(skip(self, record), fields(blob_key = %record.blob_key))]
    async fn insert(&self, record: NewImageRecord) -> Result<ImageRecord, StoreError> {
        let inserted = sqlx::query_as::<_, ImageRecord>(
            r#"
            INSERT INTO images (blob_key, uploaded_at)
            VALUES ($1, $2)
            RETURNING id, blob_key, uploaded_at, is_new, is_displayed,
                      created_at, updated_at
            "#,
        )
        .bind(&record.blob_key)
        .bind(record.uploaded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Write)?;

        debug!(id = inserted.id, "Image record inserted");
        metrics::counter!("picloop.images.inserted").increment(1);

        Ok(inserted)
    }

    async fn list_fresh(&self) -> Result<Vec<ImageRecord>, StoreError> {
        sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, blob_key, uploaded_at, is_new, is_displayed,
                   created_at, updated_at
            FROM images
            WHERE is_new
            ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Read)
    }

    async fn list_pending(&self) -> Result<Vec<ImageRecord>, StoreError> {
        sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, blob_key, uploaded_at, is_new, is_displayed,
                   created_at, updated_at
            FROM images
            WHERE NOT is_new AND NOT is_displayed
            ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Read)
    }

    #[instrument(skip(self))]
    async fn mark_shown(&self, id: ImageId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET is_new = FALSE, is_displayed = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Write)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn reset_shown_and_list_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        // One transaction: no poller may observe a half-reset cycle.
        let mut tx = self.pool.begin().await.map_err(StoreError::Write)?;

        let reset = sqlx::query(
            r#"
            UPDATE images
            SET is_displayed = FALSE, updated_at = NOW()
            WHERE is_displayed
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Write)?;

        let records = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, blob_key, uploaded_at, is_new, is_displayed,
                   created_at, updated_at
            FROM images
            ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::Read)?;

        tx.commit().await.map_err(StoreError::Write)?;

        debug!(
            reset_count = reset.rows_affected(),
            total = records.len(),
            "Rotation cycle reset"
        );

        Ok(records)
    }
}
