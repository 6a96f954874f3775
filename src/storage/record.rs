//! Buffered request records and batch watermarks.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Result, StorageError};

/// One captured request, as persisted in a storage target.
///
/// `id` is assigned by the store on insert and is `None` before that.
/// `batch_id` is `None` while the record is pending and holds the watermark
/// of the batch that claimed it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Option<i64>,
    pub head: Vec<u8>,
    pub body: Vec<u8>,
    pub arrived_at: DateTime<Utc>,
    pub batch_id: Option<i64>,
}

impl Record {
    /// Create a pending record that has not been stored yet.
    pub fn new(head: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>, arrived_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            head: head.into(),
            body: body.into(),
            arrived_at,
            batch_id: None,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(nil)".to_string());
        let batch = self
            .batch_id
            .map(|b| b.to_string())
            .unwrap_or_else(|| "(nil)".to_string());
        write!(
            f,
            "ID:\t{}\nHead:\n{}When:\t{}\nBatch:\t{}\n",
            id,
            String::from_utf8_lossy(&self.head),
            self.arrived_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            batch
        )
    }
}

/// Identifier of a claimed batch.
///
/// The id is the highest pending record id seen when the claim ran. The
/// target names the storage target the batch was claimed from (a rotation
/// bucket label, or the schema name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Watermark {
    id: i64,
    target: String,
}

impl Watermark {
    pub fn new(id: i64, target: impl Into<String>) -> Self {
        Self {
            id,
            target: target.into(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target, self.id)
    }
}

/// Format an arrival time for storage.
///
/// Fixed-width UTC with microseconds, so text order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an arrival time read back from storage.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", raw, e)))
}
