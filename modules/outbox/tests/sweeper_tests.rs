mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{event_with_budget, order_event, shared_store, Harness};
use outbox_rs::{metrics::OutboxMetrics, OutboxStatus, OutboxStore, RetentionSweeper, SweeperConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// TEST 1: Enqueue → publish → retention elapses → sweeper removes the row
#[tokio::test(start_paused = true)]
async fn test_published_event_is_swept_after_retention() {
    let h = Harness::new();
    let record = h.store.insert(&order_event("e1")).await.unwrap();
    let published_at = Utc::now();

    h.publisher.publish_batch_at(published_at).await.unwrap();
    let published = h.store.find_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(published.status, OutboxStatus::Published);
    assert_eq!(published.published_at, Some(published_at));
    assert_eq!(published.next_retry_at, None);

    let sweeper = RetentionSweeper::new(shared_store(&h.store), SweeperConfig::new().with_retention_days(30));

    // Inside the window nothing goes
    let early = sweeper
        .sweep_at(published_at + ChronoDuration::days(29))
        .await
        .unwrap();
    assert_eq!(early, 0);
    assert!(h.store.find_by_id(record.id).await.unwrap().is_some());

    let swept = sweeper
        .sweep_at(published_at + ChronoDuration::days(31))
        .await
        .unwrap();
    assert_eq!(swept, 1);
    assert!(h.store.find_by_id(record.id).await.unwrap().is_none());
}

/// TEST 2: Dead-lettered and undelivered rows survive any retention window
#[tokio::test]
async fn test_sweeper_keeps_non_published_rows() {
    let h = Harness::new();
    let now = Utc::now();

    h.store.insert(&order_event("pending")).await.unwrap();
    h.store.insert(&event_with_budget("dead", 1)).await.unwrap();

    h.bus.set_unavailable(true);
    h.publisher.publish_batch_at(now).await.unwrap();
    h.publisher
        .publish_batch_at(now + ChronoDuration::seconds(5))
        .await
        .unwrap();

    let counts = h.store.status_counts().await.unwrap();
    assert_eq!(counts.published, 0);
    assert_eq!(counts.retry, 1);
    assert_eq!(counts.dead_letter, 1);

    let sweeper = RetentionSweeper::new(shared_store(&h.store), SweeperConfig::new().with_retention_days(0));
    let swept = sweeper.sweep_at(now + ChronoDuration::days(3650)).await.unwrap();

    assert_eq!(swept, 0);
    assert_eq!(h.store.records().unwrap().len(), 2);
}

/// TEST 3: One cycle drains at most batch_size × max_batches_per_cycle rows
#[tokio::test]
async fn test_sweep_is_bounded_per_cycle() {
    let h = Harness::new();
    let now = Utc::now();
    for i in 0..7 {
        h.store.insert(&order_event(&format!("e{}", i))).await.unwrap();
    }
    h.publisher
        .publish_batch_at(now - ChronoDuration::days(60))
        .await
        .unwrap();

    let metrics = OutboxMetrics::new().unwrap();
    let sweeper = RetentionSweeper::new(
        shared_store(&h.store),
        SweeperConfig::new()
            .with_batch_size(2)
            .with_max_batches_per_cycle(2),
    )
    .with_metrics(metrics.clone());

    assert_eq!(sweeper.sweep_at(now).await.unwrap(), 4);
    assert_eq!(sweeper.sweep_at(now).await.unwrap(), 3);
    assert_eq!(sweeper.sweep_at(now).await.unwrap(), 0);
    assert_eq!(metrics.swept_total.get(), 7);
}

/// TEST 4: The sweeper loop stops on cancellation; a disabled sweeper returns at once
#[tokio::test(start_paused = true)]
async fn test_sweeper_loop_honours_cancellation() {
    let h = Harness::new();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(
        RetentionSweeper::new(
            shared_store(&h.store),
            SweeperConfig::new().with_interval(Duration::from_secs(60)),
        )
        .run(cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(150)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("sweeper should stop promptly")
        .unwrap();

    let disabled = RetentionSweeper::new(shared_store(&h.store), SweeperConfig::new().disabled());
    tokio::time::timeout(Duration::from_secs(1), disabled.run(CancellationToken::new()))
        .await
        .expect("disabled sweeper returns immediately");
}
