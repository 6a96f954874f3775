//! Lock-contention retry for the embedded engine.
//!
//! Uses `backon` with a constant delay. Only [`StorageError::Locked`] is
//! retried; every other error propagates on the first attempt. The attempt
//! count is bounded so a lock that never clears surfaces as
//! [`StorageError::LockNeverCleared`] instead of stalling the caller.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::{debug, warn};

use crate::config::LockRetryConfig;
use crate::storage::{Result, StorageError};

/// Default delay between attempts on a locked database.
pub const DEFAULT_LOCK_DELAY: Duration = Duration::from_millis(10);
/// Default attempt bound (about five seconds at the default delay).
pub const DEFAULT_LOCK_ATTEMPTS: usize = 500;

/// Retry policy for statements against the embedded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    delay: Duration,
    max_attempts: usize,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            delay: DEFAULT_LOCK_DELAY,
            max_attempts: DEFAULT_LOCK_ATTEMPTS,
        }
    }
}

impl From<&LockRetryConfig> for LockRetry {
    fn from(config: &LockRetryConfig) -> Self {
        Self::new(Duration::from_millis(config.delay_ms), config.max_attempts)
    }
}

impl LockRetry {
    /// Create a policy. `max_attempts` counts the first try; zero is treated as one.
    pub fn new(delay: Duration, max_attempts: usize) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_attempts - 1)
    }

    /// Run `op`, retrying while it reports a locked database.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = op
            .retry(self.backoff())
            .when(StorageError::is_transient)
            .notify(|err: &StorageError, delay: Duration| {
                debug!(operation, error = %err, delay = ?delay, "Storage locked, retrying");
            })
            .await;

        match result {
            Err(err) if err.is_transient() => {
                warn!(
                    operation,
                    attempts = self.max_attempts,
                    error = %err,
                    "Storage lock never cleared"
                );
                Err(StorageError::LockNeverCleared {
                    operation,
                    attempts: self.max_attempts,
                })
            }
            other => other,
        }
    }
}
