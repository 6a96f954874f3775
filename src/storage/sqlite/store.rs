//! Rotating-file store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::rotation::RotationState;
use crate::config::{Rotation, SqliteConfig};
use crate::storage::protocol::{self, BatchStatements};
use crate::storage::schema::{BATCH_INDEX_NAME, TABLE_NAME};
use crate::storage::sql::sqlite::SqliteTarget;
use crate::storage::{BatchStore, Record, Result, StorageError, Watermark};
use crate::utils::retry::LockRetry;

/// SQL for creating the requests table.
const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS raw_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    head BLOB NOT NULL,
    data BLOB NOT NULL,
    arrived_at TEXT NOT NULL,
    batch_id INTEGER
)
"#;

/// SQL for creating the batch tag index.
const CREATE_BATCH_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS raw_requests_batch_id_idx ON raw_requests (batch_id)";

impl SqliteTarget {
    /// Whether the requests table exists in this database.
    pub async fn has_table(&self) -> Result<bool> {
        let exists = self
            .run("table_exists", || async {
                sqlx::query_scalar::<_, i64>(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                )
                .bind(TABLE_NAME)
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::from_sqlite)
            })
            .await?;
        Ok(exists != 0)
    }

    /// Create the requests table and its batch index if the table is absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        if self.has_table().await? {
            return Ok(());
        }

        info!(table = TABLE_NAME, index = BATCH_INDEX_NAME, "Initializing schema");
        for ddl in [CREATE_TABLE, CREATE_BATCH_INDEX] {
            self.run("create_schema", || async {
                sqlx::query(ddl)
                    .execute(&self.pool)
                    .await
                    .map_err(StorageError::from_sqlite)?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }
}

/// Batch store on the embedded engine, one database file per time bucket.
///
/// The live target is chosen by formatting the write time at the configured
/// granularity. Crossing into a new bucket closes the old file and opens (or
/// creates) the next one. In [`Rotation::Memory`] mode a single in-memory
/// database lives as long as the store.
///
/// Buckets that are no longer live are retired. Claims drain retired
/// buckets oldest first, through transient handles, before the live one.
/// A retired bucket is forgotten once it holds no rows at all. Bucket files
/// found under the base path at open time start out retired.
///
/// Every statement runs under the [`LockRetry`] policy, since the engine
/// serializes writers at the file level. The pool's own busy timeout is
/// disabled so contention reaches the policy immediately.
pub struct RotatingFileStore {
    rotation: Rotation,
    base_path: PathBuf,
    retry: LockRetry,
    state: RwLock<RotationState>,
    // Never held while waiting on `state` for writing.
    retired: Mutex<BTreeSet<String>>,
}

impl RotatingFileStore {
    /// Open the store, making the bucket for `now` current.
    pub async fn open(config: &SqliteConfig, now: DateTime<Utc>) -> Result<Self> {
        let rotation = config.rotation;
        let base_path = PathBuf::from(&config.path);
        let retry = LockRetry::from(&config.lock_retry);

        if rotation.rotates() {
            tokio::fs::create_dir_all(&base_path).await?;
        }

        let label = rotation.label(now);
        let retired = if rotation.rotates() {
            existing_buckets(&base_path, &label).await?
        } else {
            BTreeSet::new()
        };
        let target = open_target(rotation, &base_path, &label, retry, true).await?;

        info!(
            rotation = %rotation,
            path = %base_path.display(),
            bucket = %label,
            retired = retired.len(),
            "Rotating file store opened"
        );

        Ok(Self {
            rotation,
            base_path,
            retry,
            state: RwLock::new(RotationState::new(label, target)),
            retired: Mutex::new(retired),
        })
    }

    /// Open a non-rotating in-memory store with the default retry policy.
    pub async fn in_memory() -> Result<Self> {
        let config = SqliteConfig {
            rotation: Rotation::Memory,
            ..SqliteConfig::default()
        };
        Self::open(&config, Utc::now()).await
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Label of the bucket currently receiving writes.
    pub async fn current_target(&self) -> String {
        self.state.read().await.label().to_string()
    }

    /// Database file backing the bucket `label`.
    pub fn target_path(&self, label: &str) -> PathBuf {
        target_file(&self.base_path, label)
    }

    async fn rotate_if_needed(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.rotation.rotates() {
            return Ok(());
        }

        let label = self.rotation.label(now);
        if !self.state.read().await.is_behind(&label) {
            return Ok(());
        }

        let mut state = self.state.write().await;
        // Another writer may have swapped while we waited for the lock.
        if !state.is_behind(&label) {
            return Ok(());
        }
        let target = open_target(self.rotation, &self.base_path, &label, self.retry, true).await?;
        let live = label.clone();
        let previous = state.swap(label, target).await;
        drop(state);

        let mut retired = self.retired.lock().await;
        retired.remove(&live);
        retired.insert(previous);
        Ok(())
    }

    /// Labels of buckets that are no longer live but may still hold rows.
    pub async fn retired_targets(&self) -> Vec<String> {
        self.retired.lock().await.iter().cloned().collect()
    }

    /// Claim the oldest pending rows among retired buckets.
    ///
    /// Buckets found empty, or no longer readable as stores, are forgotten.
    async fn claim_retired(&self, retired: &mut BTreeSet<String>) -> Result<Option<Watermark>> {
        for label in retired.clone() {
            let target = match self.detached_target(&label).await {
                Ok(target) => target,
                Err(StorageError::UnknownTarget(_)) => {
                    warn!(bucket = %label, "Retired bucket is not a storage target, skipping");
                    retired.remove(&label);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let claimed = claim_or_drain(&target).await;
            target.pool().close().await;
            match claimed? {
                Drain::Claimed(id) => return Ok(Some(Watermark::new(id, label))),
                Drain::Empty => {
                    info!(bucket = %label, "Retired bucket drained");
                    retired.remove(&label);
                }
                Drain::Outstanding => {}
            }
        }
        Ok(None)
    }

    /// Open a bucket that is no longer current, for batches claimed before a rotation.
    async fn detached_target(&self, label: &str) -> Result<SqliteTarget> {
        if !self.rotation.rotates() || !is_bucket_label(label) {
            return Err(StorageError::UnknownTarget(label.to_string()));
        }
        let path = self.target_path(label);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::UnknownTarget(label.to_string()));
        }
        open_target(self.rotation, &self.base_path, label, self.retry, false).await
    }
}

#[async_trait]
impl BatchStore for RotatingFileStore {
    async fn write(&self, head: &[u8], body: &[u8], now: DateTime<Utc>) -> Result<i64> {
        self.rotate_if_needed(now).await?;
        let state = self.state.read().await;
        state.target().insert(head, body, now).await
    }

    async fn claim_batch(&self) -> Result<Option<Watermark>> {
        {
            let mut retired = self.retired.lock().await;
            if let Some(watermark) = self.claim_retired(&mut retired).await? {
                return Ok(Some(watermark));
            }
        }

        let state = self.state.read().await;
        let claimed = protocol::claim(state.target()).await?;
        Ok(claimed.map(|id| Watermark::new(id, state.label())))
    }

    async fn fetch_batch(&self, watermark: &Watermark) -> Result<Vec<Record>> {
        {
            let state = self.state.read().await;
            if state.label() == watermark.target() {
                return state.target().select_batch(watermark.id()).await;
            }
        }

        let target = self.detached_target(watermark.target()).await?;
        let records = target.select_batch(watermark.id()).await;
        target.pool().close().await;
        records
    }

    async fn finalize_batch(&self, watermark: &Watermark) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.label() == watermark.target() {
                state.target().delete_batch(watermark.id()).await?;
                return Ok(());
            }
        }

        let target = self.detached_target(watermark.target()).await?;
        let deleted = target.delete_batch(watermark.id()).await;
        target.pool().close().await;
        deleted.map(|_| ())
    }

    async fn claimed_batches(&self) -> Result<Vec<Watermark>> {
        let mut watermarks = Vec::new();
        for label in self.retired_targets().await {
            let target = match self.detached_target(&label).await {
                Ok(target) => target,
                Err(StorageError::UnknownTarget(_)) => continue,
                Err(e) => return Err(e),
            };
            let ids = target.claimed_watermarks().await;
            target.pool().close().await;
            watermarks.extend(ids?.into_iter().map(|id| Watermark::new(id, label.as_str())));
        }

        let state = self.state.read().await;
        let ids = state.target().claimed_watermarks().await?;
        watermarks.extend(ids.into_iter().map(|id| Watermark::new(id, state.label())));
        Ok(watermarks)
    }
}

fn target_file(base_path: &Path, label: &str) -> PathBuf {
    base_path.join(format!("{}.db", label))
}

/// What a claim against a retired bucket found.
enum Drain {
    Claimed(i64),
    /// Nothing pending, but batches are still claimed.
    Outstanding,
    Empty,
}

async fn claim_or_drain(target: &SqliteTarget) -> Result<Drain> {
    if let Some(id) = protocol::claim(target).await? {
        return Ok(Drain::Claimed(id));
    }
    if target.claimed_watermarks().await?.is_empty() {
        Ok(Drain::Empty)
    } else {
        Ok(Drain::Outstanding)
    }
}

/// Bucket files under `base_path` other than `live`.
async fn existing_buckets(base_path: &Path, live: &str) -> Result<BTreeSet<String>> {
    let mut buckets = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(base_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("db") {
            continue;
        }
        if let Some(label) = path.file_stem().and_then(|stem| stem.to_str()) {
            if label != live && is_bucket_label(label) {
                buckets.insert(label.to_string());
            }
        }
    }
    Ok(buckets)
}

/// Bucket labels only ever contain digits, letters and dashes.
fn is_bucket_label(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

async fn open_target(
    rotation: Rotation,
    base_path: &Path,
    label: &str,
    retry: LockRetry,
    create: bool,
) -> Result<SqliteTarget> {
    let pool = if rotation.rotates() {
        let path = target_file(base_path, label);
        info!(bucket = %label, path = %path.display(), "Opening storage target");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(create)
            .busy_timeout(Duration::ZERO);
        SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlite)?
    } else {
        // One connection, never recycled: the database lives as long as it does.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.busy_timeout(Duration::ZERO);
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlite)?
    };

    let target = SqliteTarget::new(pool).with_retry(retry);
    if create {
        target.ensure_schema().await?;
    } else if !target.has_table().await? {
        // Existing file, but not one of ours.
        target.pool().close().await;
        return Err(StorageError::UnknownTarget(label.to_string()));
    }
    Ok(target)
}
