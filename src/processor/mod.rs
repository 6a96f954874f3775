//! Batch processors.
//!
//! A processor receives one claimed batch, ordered by arrival time, and
//! either accepts all of it or fails. There is no partial success: a failed
//! batch stays claimed in the store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ProcessorConfig, ProcessorType};
use crate::storage::Record;

mod http;
mod log;

pub use self::http::{BulkHttpProcessor, HttpProcessorConfig};
pub use self::log::LogProcessor;

/// Errors that can occur when processing a batch.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Downstream is temporarily unable to accept the batch.
    #[error("Processor unavailable: {0}")]
    Unavailable(String),

    /// Downstream refused the batch.
    #[error("Batch rejected: {0}")]
    Rejected(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Consumer of claimed batches.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Process a whole batch. Records arrive ascending by arrival time.
    async fn process(&self, records: &[Record]) -> Result<(), ProcessorError>;

    /// Return the processor name for logging.
    fn name(&self) -> &str;
}

/// Build the processor selected by configuration.
pub fn init_processor(config: &ProcessorConfig) -> Result<Arc<dyn BatchProcessor>, ProcessorError> {
    let processor: Arc<dyn BatchProcessor> = match config.processor_type {
        ProcessorType::Log => Arc::new(LogProcessor::new()),
        ProcessorType::Http => Arc::new(BulkHttpProcessor::new(config.http.clone())?),
    };
    info!(processor = processor.name(), "Processor initialized");
    Ok(processor)
}
