//! Mock storage implementation for testing.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::protocol::{self, BatchStatements};
use super::{BatchStore, Record, Result, StorageError, Watermark};

/// Target label carried by watermarks from the mock store.
pub const MOCK_TARGET: &str = "mock";

/// In-memory batch store with injectable failures.
///
/// Runs the real claim protocol over a `Vec` of rows, so scheduler and
/// processor tests see the same pending/claimed/removed transitions as the
/// SQL backends.
pub struct MockBatchStore {
    rows: RwLock<Vec<Record>>,
    next_id: AtomicI64,
    fail_on_write: AtomicBool,
    fail_on_claim: AtomicBool,
    fail_on_fetch: AtomicBool,
    fail_on_finalize: AtomicBool,
}

impl Default for MockBatchStore {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_on_write: AtomicBool::new(false),
            fail_on_claim: AtomicBool::new(false),
            fail_on_fetch: AtomicBool::new(false),
            fail_on_finalize: AtomicBool::new(false),
        }
    }
}

impl MockBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_claim(&self, fail: bool) {
        self.fail_on_claim.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.fail_on_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_finalize(&self, fail: bool) {
        self.fail_on_finalize.store(fail, Ordering::SeqCst);
    }

    /// Every row still held, in insertion order.
    pub async fn rows(&self) -> Vec<Record> {
        self.rows.read().await.clone()
    }

    /// Rows not claimed by any batch.
    pub async fn pending_count(&self) -> usize {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| is_pending(r))
            .count()
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Database(sqlx::Error::Protocol(format!(
                "injected {} failure",
                operation
            ))));
        }
        Ok(())
    }
}

fn is_pending(record: &Record) -> bool {
    matches!(record.batch_id, None | Some(0))
}

#[async_trait]
impl BatchStatements for MockBatchStore {
    async fn insert(&self, head: &[u8], body: &[u8], arrived_at: DateTime<Utc>) -> Result<i64> {
        let mut rows = self.rows.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = Record::new(head, body, arrived_at);
        record.id = Some(id);
        rows.push(record);
        Ok(id)
    }

    async fn max_pending_id(&self) -> Result<Option<i64>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| is_pending(r))
            .filter_map(|r| r.id)
            .max())
    }

    async fn tag_pending(&self, watermark: i64) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut tagged = 0;
        for record in rows.iter_mut() {
            if is_pending(record) && record.id.is_some_and(|id| id <= watermark) {
                record.batch_id = Some(watermark);
                tagged += 1;
            }
        }
        Ok(tagged)
    }

    async fn select_batch(&self, watermark: i64) -> Result<Vec<Record>> {
        let mut batch: Vec<Record> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.batch_id == Some(watermark))
            .cloned()
            .collect();
        batch.sort_by(|a, b| a.arrived_at.cmp(&b.arrived_at).then(a.id.cmp(&b.id)));
        Ok(batch)
    }

    async fn delete_batch(&self, watermark: i64) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.batch_id != Some(watermark));
        Ok((before - rows.len()) as u64)
    }

    async fn claimed_watermarks(&self) -> Result<Vec<i64>> {
        let mut watermarks: Vec<i64> = self
            .rows
            .read()
            .await
            .iter()
            .filter_map(|r| r.batch_id.filter(|&b| b != 0))
            .collect();
        watermarks.sort_unstable();
        watermarks.dedup();
        Ok(watermarks)
    }
}

#[async_trait]
impl BatchStore for MockBatchStore {
    async fn write(&self, head: &[u8], body: &[u8], now: DateTime<Utc>) -> Result<i64> {
        Self::check(&self.fail_on_write, "write")?;
        self.insert(head, body, now).await
    }

    async fn claim_batch(&self) -> Result<Option<Watermark>> {
        Self::check(&self.fail_on_claim, "claim")?;
        let claimed = protocol::claim(self).await?;
        Ok(claimed.map(|id| Watermark::new(id, MOCK_TARGET)))
    }

    async fn fetch_batch(&self, watermark: &Watermark) -> Result<Vec<Record>> {
        Self::check(&self.fail_on_fetch, "fetch")?;
        self.select_batch(watermark.id()).await
    }

    async fn finalize_batch(&self, watermark: &Watermark) -> Result<()> {
        Self::check(&self.fail_on_finalize, "finalize")?;
        self.delete_batch(watermark.id()).await?;
        Ok(())
    }

    async fn claimed_batches(&self) -> Result<Vec<Watermark>> {
        let ids = self.claimed_watermarks().await?;
        Ok(ids
            .into_iter()
            .map(|id| Watermark::new(id, MOCK_TARGET))
            .collect())
    }
}
