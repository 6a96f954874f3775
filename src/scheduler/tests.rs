use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::*;
use crate::processor::ProcessorError;
use crate::storage::{MockBatchStore, Record};

/// Processor that records every batch it sees and can be told to fail.
#[derive(Default)]
struct RecordingProcessor {
    batches: Mutex<Vec<Vec<Record>>>,
    fail: AtomicBool,
}

impl RecordingProcessor {
    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    async fn heads(&self) -> Vec<Vec<Vec<u8>>> {
        self.batches
            .lock()
            .await
            .iter()
            .map(|batch| batch.iter().map(|r| r.head.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl BatchProcessor for RecordingProcessor {
    async fn process(&self, records: &[Record]) -> std::result::Result<(), ProcessorError> {
        self.batches.lock().await.push(records.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unavailable("downstream down".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn scheduler() -> (Arc<MockBatchStore>, Arc<RecordingProcessor>, BatchScheduler) {
    let store = Arc::new(MockBatchStore::new());
    let processor = Arc::new(RecordingProcessor::default());
    let scheduler = BatchScheduler::new(store.clone(), processor.clone());
    (store, processor, scheduler)
}

#[tokio::test]
async fn test_tick_on_empty_store_is_idle() {
    let (_store, processor, scheduler) = scheduler();
    assert_eq!(scheduler.run_once().await.unwrap(), TickOutcome::Idle);
    assert!(processor.heads().await.is_empty());
}

#[tokio::test]
async fn test_tick_processes_and_finalizes() {
    let (store, processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();
    store.write(b"r2", b"", Utc::now()).await.unwrap();

    let outcome = scheduler.run_once().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Processed { count: 2, .. }));
    assert_eq!(
        processor.heads().await,
        vec![vec![b"r1".to_vec(), b"r2".to_vec()]]
    );
    assert!(store.rows().await.is_empty());

    assert_eq!(scheduler.run_once().await.unwrap(), TickOutcome::Idle);
}

#[tokio::test]
async fn test_processor_failure_leaves_batch_claimed() {
    let (store, processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();
    processor.set_fail(true);

    let outcome = scheduler.run_once().await.unwrap();
    let TickOutcome::ProcessorFailed { watermark } = outcome else {
        panic!("expected processor failure, got {:?}", outcome);
    };

    assert_eq!(store.rows().await.len(), 1);
    assert_eq!(store.claimed_batches().await.unwrap(), vec![watermark.clone()]);

    // The next tick only looks at pending records.
    assert_eq!(scheduler.run_once().await.unwrap(), TickOutcome::Idle);

    processor.set_fail(false);
    let outcome = scheduler.reprocess(&watermark).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Processed {
            watermark,
            count: 1
        }
    );
    assert!(store.rows().await.is_empty());
}

#[tokio::test]
async fn test_reprocess_of_finalized_batch_is_empty() {
    let (store, _processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();

    let TickOutcome::Processed { watermark, .. } = scheduler.run_once().await.unwrap() else {
        panic!("expected processed batch");
    };

    assert_eq!(
        scheduler.reprocess(&watermark).await.unwrap(),
        TickOutcome::Empty { watermark }
    );
}

#[tokio::test]
async fn test_storage_error_aborts_tick() {
    let (store, processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();

    store.set_fail_on_fetch(true);
    assert!(scheduler.run_once().await.is_err());
    assert!(processor.heads().await.is_empty());

    store.set_fail_on_fetch(false);
    store.set_fail_on_finalize(true);
    let watermark = store.claimed_batches().await.unwrap().remove(0);
    assert!(scheduler.reprocess(&watermark).await.is_err());
    assert_eq!(store.rows().await.len(), 1);
}

#[tokio::test]
async fn test_write_during_processing_lands_in_next_batch() {
    let (store, processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();
    store.write(b"r2", b"", Utc::now()).await.unwrap();

    let watermark = store.claim_batch().await.unwrap().unwrap();
    store.write(b"r3", b"", Utc::now()).await.unwrap();
    scheduler.reprocess(&watermark).await.unwrap();

    let outcome = scheduler.run_once().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Processed { count: 1, .. }));
    assert_eq!(
        processor.heads().await,
        vec![
            vec![b"r1".to_vec(), b"r2".to_vec()],
            vec![b"r3".to_vec()]
        ]
    );
}

#[tokio::test]
async fn test_with_interval() {
    let (_store, _processor, scheduler) = scheduler();
    assert_eq!(scheduler.interval(), DEFAULT_INTERVAL);
    let scheduler = scheduler.with_interval(Duration::from_millis(50));
    assert_eq!(scheduler.interval(), Duration::from_millis(50));
}

#[tokio::test]
async fn test_spawned_scheduler_drains_store() {
    let (store, _processor, scheduler) = scheduler();
    store.write(b"r1", b"", Utc::now()).await.unwrap();

    let handle = scheduler.with_interval(Duration::from_millis(20)).spawn();

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while !store.rows().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());

    handle.abort();
    let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
    assert!(result.is_ok());
}

#[test]
fn test_outcome_display() {
    let watermark = Watermark::new(7, "mock");
    assert_eq!(TickOutcome::Idle.to_string(), "idle");
    assert_eq!(
        TickOutcome::Processed {
            watermark,
            count: 3
        }
        .to_string(),
        "processed 3 records from mock#7"
    );
}
