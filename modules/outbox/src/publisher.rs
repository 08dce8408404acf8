//! Background task that publishes outbox records to the event bus
//!
//! Each tick selects due PENDING/RETRY rows, ships them concurrently (bounded
//! by `concurrency`) with a timeout around every broker call, and records the
//! outcome through the store's version compare-and-swap. Several publishers
//! may run against one table: a lost race shows up as a conflict and is
//! simply dropped.
//!
//! Outcomes are stamped with the time they are recorded, not the time the
//! batch was selected, so a slow batch cannot shorten a row's backoff.
//!
//! On cancellation the in-flight batch is abandoned. A broker call that was
//! cut short never marks its row published; the row is picked up again by a
//! later tick (a benign duplicate for consumers that de-duplicate on id).

use chrono::{DateTime, Utc};
use event_bus::{BusError, EventBus};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{EnvelopeError, OutboxError};
use crate::metrics::OutboxMetrics;
use crate::models::{add_delay, FailureKind, OutboxRecord, Transition};
use crate::repos::OutboxStore;
use crate::wire::{self, DEFAULT_TOPIC_PREFIX};

/// Publisher tuning
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub concurrency: usize,
    pub publish_timeout: Duration,
    pub topic_prefix: String,
    /// Dead-letter records whose stored payload cannot be encoded at all,
    /// instead of retrying them
    pub dead_letter_malformed: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            concurrency: 10,
            publish_timeout: Duration::from_secs(5),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            dead_letter_malformed: true,
        }
    }
}

impl PublisherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_dead_letter_malformed(mut self, enabled: bool) -> Self {
        self.dead_letter_malformed = enabled;
        self
    }
}

/// Why a single delivery attempt failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("cannot encode record: {0}")]
    Serialization(#[from] EnvelopeError),

    #[error("broker rejected publish: {0}")]
    Bus(#[from] BusError),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    /// Budget charged for this failure
    pub fn failure_kind(&self, dead_letter_malformed: bool) -> FailureKind {
        match self {
            DeliveryError::Serialization(_) if dead_letter_malformed => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }
}

/// What happened to one record in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Retry,
    DeadLettered,
    Conflict,
    StoreError,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Published => "published",
            Outcome::Retry => "retry",
            Outcome::DeadLettered => "dead_letter",
            Outcome::Conflict => "conflict",
            Outcome::StoreError => "store_error",
        }
    }
}

/// Per-batch tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub selected: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub conflicts: usize,
    pub store_errors: usize,
}

impl BatchReport {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published => self.published += 1,
            Outcome::Retry => self.retried += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Conflict => self.conflicts += 1,
            Outcome::StoreError => self.store_errors += 1,
        }
    }
}

#[derive(Clone)]
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    config: PublisherConfig,
    metrics: Option<OutboxMetrics>,
}

impl OutboxPublisher {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>, config: PublisherConfig) -> Self {
        Self {
            store,
            bus,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Poll until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Starting outbox publisher"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick_count += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(tick_count, "Outbox publisher cancelled mid-batch");
                    break;
                }
                result = self.publish_batch() => result,
            };

            let heartbeat = tick_count <= 3 || tick_count % 60 == 0;
            match result {
                Ok(report) if report.selected > 0 => {
                    tracing::info!(
                        tick_count,
                        selected = report.selected,
                        published = report.published,
                        retried = report.retried,
                        dead_lettered = report.dead_lettered,
                        conflicts = report.conflicts,
                        store_errors = report.store_errors,
                        "Publisher tick processed outbox batch"
                    );
                    self.refresh_gauges().await;
                }
                Ok(_) => {
                    if heartbeat {
                        tracing::info!(tick_count, "Publisher tick: no deliverable events");
                        self.refresh_gauges().await;
                    }
                }
                Err(e) => {
                    tracing::error!(tick_count, error = %e, "Publisher tick failed");
                }
            }
        }

        tracing::info!("Outbox publisher stopped");
    }

    /// One publish cycle at the current time
    pub async fn publish_batch(&self) -> Result<BatchReport, OutboxError> {
        self.publish_batch_at(Utc::now()).await
    }

    /// One publish cycle treating `now` as the current time
    ///
    /// Rows are selected as of `now`; each outcome is recorded at `now` plus
    /// the time elapsed since the batch started.
    pub async fn publish_batch_at(&self, now: DateTime<Utc>) -> Result<BatchReport, OutboxError> {
        let started = Instant::now();
        let records = self
            .store
            .select_deliverable(self.config.batch_size, now)
            .await?;

        let mut report = BatchReport {
            selected: records.len(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<Outcome> = stream::iter(records)
            .map(|record| self.deliver(record, now, started))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.add(outcome);
        }
        Ok(report)
    }

    async fn deliver(&self, record: OutboxRecord, now: DateTime<Utc>, started: Instant) -> Outcome {
        let result = self.send(&record).await;
        let recorded_at = add_delay(now, started.elapsed());

        let outcome = match result {
            Ok(()) => match self.store.mark_published(&record, recorded_at).await {
                Ok(Transition::Applied(_)) => {
                    tracing::info!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        retry_count = record.retry_count,
                        "Event published"
                    );
                    Outcome::Published
                }
                Ok(Transition::Conflict) => self.conflict(&record),
                Err(e) => self.store_error(&record, e),
            },
            Err(err) => {
                let kind = err.failure_kind(self.config.dead_letter_malformed);
                match self
                    .store
                    .mark_failed(&record, &err.to_string(), kind, recorded_at)
                    .await
                {
                    Ok(Transition::Applied(updated)) => self.failed(&updated, &err),
                    Ok(Transition::Conflict) => self.conflict(&record),
                    Err(e) => self.store_error(&record, e),
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(outcome.label(), record.event_type.as_str());
        }
        outcome
    }

    async fn send(&self, record: &OutboxRecord) -> Result<(), DeliveryError> {
        let message = wire::to_bus_message(record, &self.config.topic_prefix)?;
        let subject = message.subject.clone();

        let started = Instant::now();
        let result = tokio::time::timeout(self.config.publish_timeout, self.bus.publish_message(message)).await;

        let (label, result) = match result {
            Ok(Ok(())) => ("ok", Ok(())),
            Ok(Err(e)) => ("error", Err(DeliveryError::Bus(e))),
            Err(_) => ("timeout", Err(DeliveryError::Timeout(self.config.publish_timeout))),
        };

        if let Some(metrics) = &self.metrics {
            metrics
                .publish_duration_seconds
                .with_label_values(&[label])
                .observe(started.elapsed().as_secs_f64());
        }

        if let Err(e) = &result {
            tracing::warn!(
                event_id = %record.event_id,
                subject = %subject,
                retry_count = record.retry_count,
                error = %e,
                "Failed to publish event"
            );
        }
        result
    }

    fn failed(&self, updated: &OutboxRecord, err: &DeliveryError) -> Outcome {
        if updated.is_terminal() {
            tracing::error!(
                event_id = %updated.event_id,
                event_type = %updated.event_type,
                retry_count = updated.retry_count,
                max_retries = updated.max_retries,
                error = %err,
                "Event moved to dead letter"
            );
            Outcome::DeadLettered
        } else {
            tracing::info!(
                event_id = %updated.event_id,
                retry_count = updated.retry_count,
                next_retry_at = ?updated.next_retry_at,
                "Event scheduled for retry"
            );
            Outcome::Retry
        }
    }

    fn conflict(&self, record: &OutboxRecord) -> Outcome {
        tracing::debug!(
            event_id = %record.event_id,
            version = record.version,
            "Outbox record changed concurrently, outcome discarded"
        );
        Outcome::Conflict
    }

    fn store_error(&self, record: &OutboxRecord, err: OutboxError) -> Outcome {
        tracing::error!(
            event_id = %record.event_id,
            error = %err,
            "Failed to record delivery outcome"
        );
        Outcome::StoreError
    }

    async fn refresh_gauges(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match self.store.status_counts().await {
            Ok(counts) => metrics.set_status_counts(&counts),
            Err(e) => tracing::warn!(error = %e, "Failed to refresh outbox gauges"),
        }
    }
}

/// Spawn-friendly entry point used by `main`
pub async fn run_publisher_task(
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    config: PublisherConfig,
    metrics: OutboxMetrics,
    cancel: CancellationToken,
) {
    OutboxPublisher::new(store, bus, config)
        .with_metrics(metrics)
        .run(cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_serialization_failures_can_be_permanent() {
        let malformed = DeliveryError::Serialization(EnvelopeError::Serialization("bad".into()));
        assert_eq!(malformed.failure_kind(true), FailureKind::Permanent);
        assert_eq!(malformed.failure_kind(false), FailureKind::Transient);

        let timeout = DeliveryError::Timeout(Duration::from_secs(5));
        assert_eq!(timeout.failure_kind(true), FailureKind::Transient);

        let refused = DeliveryError::Bus(BusError::ConnectionError("down".into()));
        assert_eq!(refused.failure_kind(true), FailureKind::Transient);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PublisherConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.topic_prefix, "bss.events");
        assert!(config.dead_letter_malformed);
    }
}
