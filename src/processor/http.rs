//! Bulk HTTP processor.
//!
//! Flattens each record to one line and POSTs the lines to a bulk ingestion
//! endpoint in size-bounded bodies.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::{BatchProcessor, ProcessorError};
use crate::storage::Record;

/// Default upper bound for one POST body.
pub const DEFAULT_BATCH_MAX_BYTES: usize = 5 * 1024 * 1024;
/// Default upper bound for one event line.
pub const DEFAULT_EVENT_MAX_BYTES: usize = 1024 * 1024;

/// Bulk HTTP processor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpProcessorConfig {
    /// Bulk endpoint URL.
    pub endpoint: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum size of one POST body.
    pub batch_max_bytes: usize,

    /// Events larger than this are skipped with a warning.
    pub event_max_bytes: usize,
}

impl Default for HttpProcessorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 30,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            event_max_bytes: DEFAULT_EVENT_MAX_BYTES,
        }
    }
}

impl HttpProcessorConfig {
    /// Set the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the body and event size limits.
    pub fn with_limits(mut self, batch_max_bytes: usize, event_max_bytes: usize) -> Self {
        self.batch_max_bytes = batch_max_bytes;
        self.event_max_bytes = event_max_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bulk HTTP processor.
///
/// Posts every body of a batch in order, retrying transient failures. The
/// first body that still fails after retries fails the whole batch.
pub struct BulkHttpProcessor {
    client: Client,
    config: HttpProcessorConfig,
}

impl BulkHttpProcessor {
    /// Create a new processor with the given configuration.
    pub fn new(config: HttpProcessorConfig) -> Result<Self, ProcessorError> {
        if config.endpoint.is_empty() {
            return Err(ProcessorError::Config(
                "HTTP endpoint not configured".to_string(),
            ));
        }
        if config.event_max_bytes >= config.batch_max_bytes {
            return Err(ProcessorError::Config(format!(
                "event_max_bytes ({}) must be below batch_max_bytes ({})",
                config.event_max_bytes, config.batch_max_bytes
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ProcessorError::Http)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpProcessorConfig {
        &self.config
    }

    /// Backoff configuration for retries.
    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(5)
            .with_jitter()
    }

    /// Determine if an HTTP error is retryable.
    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }

    /// Determine if an HTTP status code is retryable.
    fn is_retryable_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn should_retry(err: &ProcessorError) -> bool {
        match err {
            ProcessorError::Http(e) => Self::is_retryable(e),
            ProcessorError::Unavailable(_) => true,
            ProcessorError::Rejected(_) | ProcessorError::Config(_) => false,
        }
    }

    /// Split records into POST bodies, dropping oversized events.
    fn bodies(&self, records: &[Record]) -> Vec<Vec<u8>> {
        let lines = records.iter().filter_map(|record| {
            let line = format_line(record);
            if line.len() > self.config.event_max_bytes {
                warn!(
                    id = record.id,
                    size = line.len(),
                    event_max = self.config.event_max_bytes,
                    "Event exceeds maximum size, skipping"
                );
                return None;
            }
            Some(line)
        });
        pack(lines, self.config.batch_max_bytes)
    }

    async fn post_body(&self, body: &[u8]) -> Result<(), ProcessorError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "text/plain")
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            debug!(
                endpoint = %self.config.endpoint,
                bytes = body.len(),
                status = %status,
                "Bulk body posted"
            );
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let detail = format!(
            "HTTP {} - {}",
            status,
            text.chars().take(200).collect::<String>()
        );

        if Self::is_retryable_status(status) {
            warn!(
                endpoint = %self.config.endpoint,
                status = %status,
                body = %text,
                "Bulk POST returned retryable status"
            );
            Err(ProcessorError::Unavailable(detail))
        } else {
            error!(
                endpoint = %self.config.endpoint,
                status = %status,
                body = %text,
                "Bulk POST failed"
            );
            Err(ProcessorError::Rejected(detail))
        }
    }
}

#[async_trait]
impl BatchProcessor for BulkHttpProcessor {
    async fn process(&self, records: &[Record]) -> Result<(), ProcessorError> {
        for body in self.bodies(records) {
            (|| async { self.post_body(&body).await })
                .retry(Self::backoff())
                .when(Self::should_retry)
                .notify(|err: &ProcessorError, delay: Duration| {
                    debug!(error = %err, delay = ?delay, "Retrying bulk POST");
                })
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Flatten a record to one line: head then body, with every line break
/// (`\r\n` or `\n`) replaced by the two characters `\n`.
pub fn format_line(record: &Record) -> Vec<u8> {
    let mut line = Vec::with_capacity(record.head.len() + record.body.len());
    escape_line_breaks(&record.head, &mut line);
    escape_line_breaks(&record.body, &mut line);
    line
}

fn escape_line_breaks(input: &[u8], out: &mut Vec<u8>) {
    let mut bytes = input.iter().peekable();
    while let Some(&b) = bytes.next() {
        match b {
            b'\r' if bytes.peek() == Some(&&b'\n') => {
                bytes.next();
                out.extend_from_slice(b"\\n");
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
}

/// Pack newline-terminated lines into bodies of at most `batch_max` bytes.
///
/// A single line longer than `batch_max` gets a body of its own.
pub fn pack(lines: impl IntoIterator<Item = Vec<u8>>, batch_max: usize) -> Vec<Vec<u8>> {
    let mut bodies = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for line in lines {
        if !current.is_empty() && current.len() + line.len() + 1 > batch_max {
            bodies.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&line);
        current.push(b'\n');
    }

    if !current.is_empty() {
        bodies.push(current);
    }
    bodies
}
