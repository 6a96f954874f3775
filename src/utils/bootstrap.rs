//! Bootstrap utilities for the reqdump binary.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the REQDUMP_LOG environment variable.
///
/// Defaults to "info" level if REQDUMP_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Backoff for startup connections: 100ms doubling up to 5s, with jitter.
///
/// `max_attempts` counts the first try; zero is treated as one.
fn startup_backoff(max_attempts: u32) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_attempts.max(1) as usize - 1)
        .with_jitter()
}

/// Open a resource at startup with exponential backoff.
///
/// A database server started alongside the process may not accept
/// connections yet. Gives up after `max_attempts` and returns the last error.
///
/// # Arguments
/// * `what` - Human-readable name for logging (e.g., "storage")
/// * `location` - Where the resource lives, for logging
/// * `max_attempts` - Attempts before giving up, at least one
/// * `open` - Async function that attempts to open the resource
pub async fn open_with_retry<T, E, F, Fut>(
    what: &str,
    location: &str,
    max_attempts: u32,
    open: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = open
        .retry(startup_backoff(max_attempts))
        .notify(|err: &E, delay: Duration| {
            warn!(
                "Failed to open {} at {}: {}. Retrying in {:?}...",
                what, location, err, delay
            );
        })
        .await;

    match &result {
        Ok(_) => info!(what, location, "Opened"),
        Err(e) => error!(
            "Failed to open {} at {} after {} attempts: {}",
            what,
            location,
            max_attempts.max(1),
            e
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_open_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = open_with_retry("storage", "test", 5, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("refused".to_string())
            } else {
                Ok("open")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "open");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = open_with_retry("storage", "test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("refused".to_string())
        })
        .await;

        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = open_with_retry("storage", "test", 0, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("refused".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
