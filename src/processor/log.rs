//! Logging processor.

use async_trait::async_trait;
use tracing::info;

use super::{BatchProcessor, ProcessorError};
use crate::storage::Record;

/// Processor that writes every record to the log and always succeeds.
#[derive(Debug, Default)]
pub struct LogProcessor;

impl LogProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchProcessor for LogProcessor {
    async fn process(&self, records: &[Record]) -> Result<(), ProcessorError> {
        for record in records {
            info!(
                id = record.id,
                batch = record.batch_id,
                arrived_at = %record.arrived_at,
                body_bytes = record.body.len(),
                "\n{}",
                record
            );
        }
        info!(count = records.len(), "Logged batch");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
