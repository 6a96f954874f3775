//! Storage implementations.
//!
//! A [`BatchStore`] durably buffers captured requests and hands them out in
//! batches. Two backends implement it:
//!
//! - [`RotatingFileStore`] on the embedded engine, one database file per time
//!   bucket, every statement under the lock retry policy;
//! - [`SchemaStore`] on PostgreSQL, one schema for the process lifetime.
//!
//! Both drive the same claim protocol (see [`protocol`]) through
//! [`BatchStatements`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{StorageConfig, StorageType};

mod error;
pub mod protocol;
mod record;
pub mod schema;
pub mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{Result, StorageError, SQLITE_BUSY, SQLITE_LOCKED};
pub use protocol::{claim, BatchStatements};
pub use record::{format_timestamp, parse_timestamp, Record, Watermark};

#[cfg(feature = "sqlite")]
pub use sqlite::RotatingFileStore;

#[cfg(feature = "postgres")]
pub use postgres::SchemaStore;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBatchStore;

/// Durable request buffer with batch extraction.
///
/// Records move from pending to claimed (tagged with a watermark) to removed.
/// Writes never wait on a claim. A claim takes every record pending at the
/// moment it reads the watermark and nothing written after.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Store a pending record. Returns the id the store assigned to it.
    async fn write(&self, head: &[u8], body: &[u8], now: DateTime<Utc>) -> Result<i64>;

    /// Claim every pending record into a new batch.
    ///
    /// `None` means nothing was pending. Callers must not fetch or finalize then.
    async fn claim_batch(&self) -> Result<Option<Watermark>>;

    /// Records claimed under `watermark`, ascending by arrival time.
    ///
    /// An empty result is valid.
    async fn fetch_batch(&self, watermark: &Watermark) -> Result<Vec<Record>>;

    /// Remove every record claimed under `watermark`. Idempotent.
    async fn finalize_batch(&self, watermark: &Watermark) -> Result<()>;

    /// Watermarks claimed but not yet finalized on the current target.
    async fn claimed_batches(&self) -> Result<Vec<Watermark>>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn BatchStore>> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!(
                rotation = %config.sqlite.rotation,
                path = %config.sqlite.path,
                "Storage: sqlite"
            );
            let store = RotatingFileStore::open(&config.sqlite, Utc::now()).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err(StorageError::InvalidConfig(
            "sqlite storage requested but the 'sqlite' feature is not enabled".to_string(),
        )),
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            info!(schema = %config.postgres.schema, "Storage: postgres");
            let store = SchemaStore::connect(&config.postgres).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => Err(StorageError::InvalidConfig(
            "postgres storage requested but the 'postgres' feature is not enabled".to_string(),
        )),
    }
}
