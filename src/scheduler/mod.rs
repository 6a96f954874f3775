//! Periodic claim-fetch-process-finalize loop.
//!
//! The `BatchScheduler` runs as a background task next to the capture path.
//! The two only meet in the store: no queue sits between them.
//!
//! Ticks are serialized. The loop awaits each tick before waiting for the
//! next one and skips ticks it missed, so at most one claim and one processor
//! call are ever in flight from a scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::processor::BatchProcessor;
use crate::storage::{BatchStore, Result, Watermark};

/// Default interval between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Idle,
    /// A watermark was claimed but matched no records. Nothing was finalized.
    Empty { watermark: Watermark },
    /// The batch was processed and removed from the store.
    Processed { watermark: Watermark, count: usize },
    /// The processor failed. The batch stays claimed until reprocessed.
    ProcessorFailed { watermark: Watermark },
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Idle => write!(f, "idle"),
            TickOutcome::Empty { watermark } => write!(f, "empty batch {}", watermark),
            TickOutcome::Processed { watermark, count } => {
                write!(f, "processed {} records from {}", count, watermark)
            }
            TickOutcome::ProcessorFailed { watermark } => {
                write!(f, "processor failed on {}", watermark)
            }
        }
    }
}

/// Drives batches from a store through a processor on a fixed interval.
pub struct BatchScheduler {
    store: Arc<dyn BatchStore>,
    processor: Arc<dyn BatchProcessor>,
    interval: Duration,
}

impl BatchScheduler {
    pub fn new(store: Arc<dyn BatchStore>, processor: Arc<dyn BatchProcessor>) -> Self {
        Self {
            store,
            processor,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Set custom tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick: claim, fetch, process, and finalize on success.
    ///
    /// Storage errors abort the tick and are returned. A processor failure is
    /// not an error here; it is reported as [`TickOutcome::ProcessorFailed`].
    pub async fn run_once(&self) -> Result<TickOutcome> {
        let Some(watermark) = self.store.claim_batch().await? else {
            return Ok(TickOutcome::Idle);
        };
        self.deliver(watermark).await
    }

    /// Re-fetch, process and finalize a batch that is claimed but unfinalized.
    ///
    /// Used for manual recovery after a processor failure; the regular tick
    /// never revisits a claimed batch.
    pub async fn reprocess(&self, watermark: &Watermark) -> Result<TickOutcome> {
        info!(watermark = %watermark, "Reprocessing claimed batch");
        self.deliver(watermark.clone()).await
    }

    async fn deliver(&self, watermark: Watermark) -> Result<TickOutcome> {
        let records = self.store.fetch_batch(&watermark).await?;
        if records.is_empty() {
            warn!(watermark = %watermark, "Claimed batch has no records");
            return Ok(TickOutcome::Empty { watermark });
        }

        let count = records.len();
        if let Err(e) = self.processor.process(&records).await {
            error!(
                watermark = %watermark,
                count,
                processor = self.processor.name(),
                error = %e,
                "Processor failed, batch left claimed"
            );
            return Ok(TickOutcome::ProcessorFailed { watermark });
        }

        self.store.finalize_batch(&watermark).await?;
        Ok(TickOutcome::Processed { watermark, count })
    }

    /// Run ticks forever.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            processor = self.processor.name(),
            "Batch scheduler started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.run_once().await {
                Ok(TickOutcome::Idle) => {
                    debug!("No pending records");
                }
                Ok(TickOutcome::Processed { watermark, count }) => {
                    info!(watermark = %watermark, count, "Batch processed");
                }
                Ok(outcome) => {
                    warn!(outcome = %outcome, "Batch not finalized");
                }
                Err(e) => {
                    error!(error = %e, "Scheduler tick failed");
                }
            }
        }
    }

    /// Spawn the scheduler as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests;
