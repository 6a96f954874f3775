//! reqdump-batcher: drains buffered requests into a processor
//!
//! Opens the configured store, then claims, processes and finalizes a batch
//! on every scheduler tick until interrupted.
//!
//! ## Architecture
//! ```text
//! [capture endpoint] --write--> [store] <--claim/fetch/finalize-- [reqdump-batcher]
//!                                                                         |
//!                                                                         v
//!                                                                   [processor]
//! ```
//!
//! ## Configuration
//! - REQDUMP_CONFIG: Path to a YAML config file (optional)
//! - REQDUMP__STORAGE__TYPE, REQDUMP__PROCESSOR__TYPE, ...: per-field overrides
//! - REQDUMP_LOG: tracing filter (default: info)
//!
//! On startup, batches left claimed by an earlier failed run are reprocessed
//! before the first tick.

use tracing::{error, info, warn};

use reqdump::config::Config;
use reqdump::processor::init_processor;
use reqdump::scheduler::BatchScheduler;
use reqdump::storage::init_storage;
use reqdump::utils::bootstrap::{init_tracing, open_with_retry};

/// Attempts to open storage before giving up.
const STORAGE_OPEN_ATTEMPTS: u32 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;

    let location = format!("{:?}", config.storage.storage_type).to_lowercase();
    let store = open_with_retry("storage", &location, STORAGE_OPEN_ATTEMPTS, || {
        init_storage(&config.storage)
    })
    .await?;

    let processor = init_processor(&config.processor)?;
    let scheduler = BatchScheduler::new(store.clone(), processor)
        .with_interval(config.scheduler.interval());

    match store.claimed_batches().await {
        Ok(watermarks) => {
            for watermark in watermarks {
                match scheduler.reprocess(&watermark).await {
                    Ok(outcome) => info!(outcome = %outcome, "Recovered claimed batch"),
                    Err(e) => warn!(watermark = %watermark, error = %e, "Recovery failed"),
                }
            }
        }
        Err(e) => error!(error = %e, "Failed to list claimed batches"),
    }

    info!(
        interval_secs = config.scheduler.interval_secs,
        "reqdump-batcher started"
    );
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.abort();

    Ok(())
}
