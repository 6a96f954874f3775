//! Request capture.
//!
//! Turns an inbound HTTP request into a stored record. The head is the
//! request line plus headers in wire format; the body is stored as received.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::request::Parts;
use http::StatusCode;
use tracing::{debug, error};

use crate::storage::{BatchStore, StorageError};

/// Errors surfaced to the capture endpoint.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to store request: {0}")]
    Storage(#[from] StorageError),
}

impl CaptureError {
    /// HTTP status to answer the captured request with.
    pub fn status(&self) -> StatusCode {
        match self {
            CaptureError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Serialize the request line and headers, terminated by a blank line.
pub fn dump_head(parts: &Parts) -> Vec<u8> {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(parts.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.push(b' ');
    head.extend_from_slice(format!("{:?}", parts.version).as_bytes());
    head.extend_from_slice(b"\r\n");

    if !parts.headers.contains_key(http::header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            head.extend_from_slice(b"Host: ");
            head.extend_from_slice(authority.as_str().as_bytes());
            head.extend_from_slice(b"\r\n");
        }
    }

    for (name, value) in &parts.headers {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Store one captured request. Returns the id the store assigned.
pub async fn capture_request(
    store: &dyn BatchStore,
    parts: &Parts,
    body: &Bytes,
    now: DateTime<Utc>,
) -> Result<i64, CaptureError> {
    let head = dump_head(parts);
    match store.write(&head, body, now).await {
        Ok(id) => {
            debug!(id, method = %parts.method, uri = %parts.uri, bytes = body.len(), "Captured request");
            Ok(id)
        }
        Err(e) => {
            error!(method = %parts.method, uri = %parts.uri, error = %e, "Failed to capture request");
            Err(e.into())
        }
    }
}
