//! Batch claim protocol.
//!
//! Claiming a batch is two statements against one storage target:
//!
//! 1. read the highest pending id (`max(id) WHERE batch_id` unset);
//! 2. tag every pending row with `id <=` that value, in one UPDATE.
//!
//! Ids are monotonic within a target, so a row inserted after step 1 has a
//! larger id and stays pending even if it lands before step 2 runs. Writers
//! never wait for a claim. Two concurrent claims cannot tag the same row
//! because step 2 only touches rows that are still unset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Record, Result};

/// Single-statement primitives a storage target exposes.
///
/// Every method maps to exactly one SQL statement, so the embedded-engine
/// retry policy can wrap each one individually.
#[async_trait]
pub trait BatchStatements: Send + Sync {
    /// Insert a pending record, returning its assigned id.
    async fn insert(&self, head: &[u8], body: &[u8], arrived_at: DateTime<Utc>) -> Result<i64>;

    /// Highest id among pending rows, or `None` when nothing is pending.
    async fn max_pending_id(&self) -> Result<Option<i64>>;

    /// Tag pending rows with `id <= watermark`. Returns the number of rows tagged.
    async fn tag_pending(&self, watermark: i64) -> Result<u64>;

    /// Rows tagged with `watermark`, ascending by arrival time.
    async fn select_batch(&self, watermark: i64) -> Result<Vec<Record>>;

    /// Delete rows tagged with `watermark`. Returns the number of rows removed.
    async fn delete_batch(&self, watermark: i64) -> Result<u64>;

    /// Distinct watermarks of rows that are claimed but not yet finalized.
    async fn claimed_watermarks(&self) -> Result<Vec<i64>>;
}

/// Claim every currently pending row of a target into one batch.
///
/// Returns the watermark, or `None` if no pending row exists or a concurrent
/// claim tagged everything first.
pub async fn claim<S: BatchStatements + ?Sized>(statements: &S) -> Result<Option<i64>> {
    let Some(max_pending) = statements.max_pending_id().await? else {
        return Ok(None);
    };

    let tagged = statements.tag_pending(max_pending).await?;
    if tagged == 0 {
        debug!(watermark = max_pending, "Claim raced, nothing left to tag");
        return Ok(None);
    }

    debug!(watermark = max_pending, tagged, "Claimed batch");
    Ok(Some(max_pending))
}
