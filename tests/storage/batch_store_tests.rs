//! BatchStore interface tests.
//!
//! These tests verify the contract of the BatchStore trait.
//! Each storage implementation should run these tests.
//!
//! Tests share one store, so each starts by draining whatever an earlier
//! test left behind.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use reqdump::storage::{BatchStore, Watermark};

/// Arrival times at or before "now", so a rotating store never moves forward
/// to a new bucket mid-test.
fn past(secs_ago: i64) -> DateTime<Utc> {
    let now = Utc::now() - Duration::seconds(secs_ago);
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Claim and finalize everything the store holds.
pub async fn drain<S: BatchStore>(store: &S) {
    for watermark in store.claimed_batches().await.expect("claimed_batches should succeed") {
        store.finalize_batch(&watermark).await.unwrap();
    }
    while let Some(watermark) = store.claim_batch().await.expect("claim should succeed") {
        store.finalize_batch(&watermark).await.unwrap();
    }
}

async fn batch_ids<S: BatchStore>(store: &S, watermark: &Watermark) -> Vec<i64> {
    store
        .fetch_batch(watermark)
        .await
        .expect("fetch should succeed")
        .iter()
        .map(|r| r.id.expect("stored record has an id"))
        .collect()
}

// =============================================================================
// BatchStore::claim_batch tests
// =============================================================================

pub async fn test_claim_empty_is_none<S: BatchStore>(store: &S) {
    drain(store).await;
    let claimed = store.claim_batch().await.expect("claim should succeed");
    assert!(claimed.is_none(), "empty store should claim nothing");
}

pub async fn test_claim_skips_claimed_rows<S: BatchStore>(store: &S) {
    drain(store).await;
    store.write(b"only", b"", past(1)).await.unwrap();

    let first = store.claim_batch().await.unwrap();
    assert!(first.is_some(), "pending row should be claimed");

    let second = store.claim_batch().await.unwrap();
    assert!(second.is_none(), "claimed rows must not be claimed again");

    store.finalize_batch(&first.unwrap()).await.unwrap();
}

// =============================================================================
// Full cycle
// =============================================================================

pub async fn test_write_claim_fetch_finalize<S: BatchStore>(store: &S) {
    drain(store).await;

    let r1 = store.write(b"R1", b"one", past(3)).await.unwrap();
    let r2 = store.write(b"R2", b"two", past(2)).await.unwrap();
    assert!(r2 > r1, "ids must increase in insertion order");

    let watermark = store.claim_batch().await.unwrap().expect("batch expected");
    assert_eq!(watermark.id(), r2, "watermark is the highest pending id");

    let records = store.fetch_batch(&watermark).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].head, b"R1");
    assert_eq!(records[1].head, b"R2");

    let r3 = store.write(b"R3", b"three", past(1)).await.unwrap();
    assert!(r3 > r2);

    store.finalize_batch(&watermark).await.unwrap();
    assert!(
        store.fetch_batch(&watermark).await.unwrap().is_empty(),
        "finalized batch should be gone"
    );

    let next = store.claim_batch().await.unwrap().expect("R3 should be pending");
    assert_eq!(next.id(), r3);
    assert_eq!(batch_ids(store, &next).await, vec![r3]);

    store.finalize_batch(&next).await.unwrap();
}

pub async fn test_record_fields_preserved<S: BatchStore>(store: &S) {
    drain(store).await;

    let arrived_at = past(1);
    let head = b"POST /x HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
    let body = vec![0u8, 159, 146, 150, 255, b'\n'];
    let id = store.write(&head, &body, arrived_at).await.unwrap();

    let watermark = store.claim_batch().await.unwrap().unwrap();
    let records = store.fetch_batch(&watermark).await.unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.id, Some(id));
    assert_eq!(record.head, head);
    assert_eq!(record.body, body, "binary body must survive storage");
    assert_eq!(record.arrived_at, arrived_at);
    assert_eq!(record.batch_id, Some(watermark.id()));

    store.finalize_batch(&watermark).await.unwrap();
}

pub async fn test_fetch_orders_by_arrival<S: BatchStore>(store: &S) {
    drain(store).await;

    store.write(b"second", b"", past(5)).await.unwrap();
    store.write(b"first", b"", past(10)).await.unwrap();
    store.write(b"third", b"", past(1)).await.unwrap();

    let watermark = store.claim_batch().await.unwrap().unwrap();
    let heads: Vec<Vec<u8>> = store
        .fetch_batch(&watermark)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.head)
        .collect();
    assert_eq!(
        heads,
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );

    store.finalize_batch(&watermark).await.unwrap();
}

// =============================================================================
// BatchStore::finalize_batch tests
// =============================================================================

pub async fn test_finalize_idempotent<S: BatchStore>(store: &S) {
    drain(store).await;
    store.write(b"x", b"", past(1)).await.unwrap();

    let watermark = store.claim_batch().await.unwrap().unwrap();
    store
        .finalize_batch(&watermark)
        .await
        .expect("first finalize should succeed");
    store
        .finalize_batch(&watermark)
        .await
        .expect("second finalize should be a no-op");

    assert!(store.claim_batch().await.unwrap().is_none());
}

pub async fn test_finalize_leaves_other_batches<S: BatchStore>(store: &S) {
    drain(store).await;

    store.write(b"a", b"", past(2)).await.unwrap();
    let first = store.claim_batch().await.unwrap().unwrap();
    store.write(b"b", b"", past(1)).await.unwrap();
    let second = store.claim_batch().await.unwrap().unwrap();

    store.finalize_batch(&first).await.unwrap();
    assert_eq!(store.fetch_batch(&second).await.unwrap().len(), 1);

    store.finalize_batch(&second).await.unwrap();
}

// =============================================================================
// BatchStore::claimed_batches tests
// =============================================================================

pub async fn test_claimed_batches_lists_unfinalized<S: BatchStore>(store: &S) {
    drain(store).await;
    assert!(store.claimed_batches().await.unwrap().is_empty());

    store.write(b"a", b"", past(2)).await.unwrap();
    let first = store.claim_batch().await.unwrap().unwrap();
    store.write(b"b", b"", past(1)).await.unwrap();
    let second = store.claim_batch().await.unwrap().unwrap();

    let claimed = store.claimed_batches().await.unwrap();
    assert_eq!(claimed, vec![first.clone(), second.clone()]);

    store.finalize_batch(&first).await.unwrap();
    assert_eq!(store.claimed_batches().await.unwrap(), vec![second.clone()]);

    store.finalize_batch(&second).await.unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

pub async fn test_concurrent_writes_claimed_exactly_once<S: BatchStore>(store: &S) {
    drain(store).await;

    const WRITES: usize = 40;

    let writes = futures::future::join_all((0..WRITES).map(|i| async move {
        let head = format!("GET /{} HTTP/1.1\r\n\r\n", i);
        store.write(head.as_bytes(), b"", past(1)).await.unwrap()
    }));

    let claims = async {
        let mut watermarks = Vec::new();
        for _ in 0..WRITES {
            if let Some(watermark) = store.claim_batch().await.unwrap() {
                watermarks.push(watermark);
            }
            tokio::task::yield_now().await;
        }
        watermarks
    };

    let (written, mut watermarks) = futures::join!(writes, claims);
    while let Some(watermark) = store.claim_batch().await.unwrap() {
        watermarks.push(watermark);
    }

    let mut claimed = Vec::new();
    for watermark in &watermarks {
        claimed.extend(batch_ids(store, watermark).await);
        store.finalize_batch(watermark).await.unwrap();
    }

    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len(), "no record may be claimed twice");
    assert_eq!(
        unique,
        written.into_iter().collect::<HashSet<i64>>(),
        "every written record must be claimed"
    );
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all BatchStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_batch_store_tests {
    ($store:expr) => {
        use $crate::storage::batch_store_tests::*;

        // claim tests
        test_claim_empty_is_none($store).await;
        println!("  test_claim_empty_is_none: PASSED");

        test_claim_skips_claimed_rows($store).await;
        println!("  test_claim_skips_claimed_rows: PASSED");

        // full cycle
        test_write_claim_fetch_finalize($store).await;
        println!("  test_write_claim_fetch_finalize: PASSED");

        test_record_fields_preserved($store).await;
        println!("  test_record_fields_preserved: PASSED");

        test_fetch_orders_by_arrival($store).await;
        println!("  test_fetch_orders_by_arrival: PASSED");

        // finalize tests
        test_finalize_idempotent($store).await;
        println!("  test_finalize_idempotent: PASSED");

        test_finalize_leaves_other_batches($store).await;
        println!("  test_finalize_leaves_other_batches: PASSED");

        // recovery
        test_claimed_batches_lists_unfinalized($store).await;
        println!("  test_claimed_batches_lists_unfinalized: PASSED");

        // concurrency
        test_concurrent_writes_claimed_exactly_once($store).await;
        println!("  test_concurrent_writes_claimed_exactly_once: PASSED");
    };
}
