//! Producer-side API used by business transactions
//!
//! Enqueueing is the only thing a business transaction ever does with the
//! outbox. Delivery failures are never visible here; a duplicate `event_id`
//! is reported as [`EnqueueOutcome::Duplicate`] rather than an error.

use sqlx::{Acquire, Postgres, Transaction};
use std::sync::Arc;

use crate::error::OutboxError;
use crate::models::{NewOutboxEvent, DEFAULT_MAX_RETRIES, DEFAULT_SOURCE};
use crate::repos::{insert_outbox_event, OutboxStore};

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new row was written with this id
    Enqueued(i64),
    /// The `event_id` was already present; the first row stands
    Duplicate,
}

/// Values filled into events that leave them unset
///
/// Applied by the producer and by both stores, so every insert path honours
/// the configured source and retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerDefaults {
    pub source: String,
    pub max_retries: i32,
}

impl Default for ProducerDefaults {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Clone)]
pub struct OutboxProducer {
    store: Arc<dyn OutboxStore>,
    defaults: ProducerDefaults,
}

impl ProducerDefaults {
    pub fn apply(&self, mut event: NewOutboxEvent) -> NewOutboxEvent {
        if event.source.is_none() {
            event.source = Some(self.source.clone());
        }
        if event.max_retries.is_none() {
            event.max_retries = Some(self.max_retries);
        }
        event
    }
}

impl OutboxProducer {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self {
            store,
            defaults: ProducerDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ProducerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Enqueue an event through the configured store
    pub async fn enqueue(&self, event: NewOutboxEvent) -> Result<EnqueueOutcome, OutboxError> {
        let event = self.defaults.apply(event);
        let result = self.store.insert(&event).await;
        outcome(&event, result.map(|record| record.id))
    }

    /// Enqueue an event inside a caller-owned Postgres transaction
    ///
    /// The insert runs under a savepoint so a duplicate does not poison the
    /// caller's transaction; the business change can still commit.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: NewOutboxEvent,
    ) -> Result<EnqueueOutcome, OutboxError> {
        let event = self.defaults.apply(event);
        event.validate()?;

        let mut savepoint = Acquire::begin(&mut **tx).await?;
        match insert_outbox_event(&mut savepoint, &event).await {
            Ok(record) => {
                savepoint.commit().await?;
                outcome(&event, Ok(record.id))
            }
            Err(err) => {
                savepoint.rollback().await?;
                outcome(&event, Err(err))
            }
        }
    }
}

fn outcome(
    event: &NewOutboxEvent,
    result: Result<i64, OutboxError>,
) -> Result<EnqueueOutcome, OutboxError> {
    match result {
        Ok(id) => {
            tracing::debug!(
                id,
                event_id = %event.event_id,
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                "Event enqueued"
            );
            Ok(EnqueueOutcome::Enqueued(id))
        }
        Err(OutboxError::DuplicateEvent(event_id)) => {
            tracing::info!(event_id = %event_id, "Duplicate event ignored");
            Ok(EnqueueOutcome::Duplicate)
        }
        Err(e) => Err(e),
    }
}
