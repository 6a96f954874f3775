//! Rotation state for the rotating-file store.
//!
//! The store keeps one [`RotationState`] behind a read/write lock. Writes,
//! claims, fetches and finalizes take the read side for the duration of a
//! single statement sequence; a bucket swap takes the write side, so nothing
//! ever runs against a half-swapped handle.

use tracing::info;

use crate::storage::sql::sqlite::SqliteTarget;

/// The live storage target and the bucket label it was opened for.
pub(super) struct RotationState {
    label: String,
    target: SqliteTarget,
}

impl RotationState {
    pub(super) fn new(label: String, target: SqliteTarget) -> Self {
        Self { label, target }
    }

    pub(super) fn label(&self) -> &str {
        &self.label
    }

    pub(super) fn target(&self) -> &SqliteTarget {
        &self.target
    }

    /// Whether `candidate` names a later bucket than the live one.
    pub(super) fn is_behind(&self, candidate: &str) -> bool {
        bucket_advanced(&self.label, candidate)
    }

    /// Close the live target and install `target` for bucket `label`.
    ///
    /// Returns the label of the bucket that was closed.
    pub(super) async fn swap(&mut self, label: String, target: SqliteTarget) -> String {
        let previous = std::mem::replace(&mut self.label, label);
        let old = std::mem::replace(&mut self.target, target);
        old.pool().close().await;
        info!(from = %previous, to = %self.label, "Rotated storage target");
        previous
    }
}

/// Bucket labels sort chronologically, so only strictly greater labels
/// trigger a swap. A write stamped with an older time lands in the live
/// bucket instead of reopening a closed one.
pub(super) fn bucket_advanced(current: &str, candidate: &str) -> bool {
    candidate > current
}
