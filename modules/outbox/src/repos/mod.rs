//! Outbox store abstraction
//!
//! The publisher, sweeper and HTTP surface only see `Arc<dyn OutboxStore>`;
//! Postgres in production, an in-memory map in dev/test.
//!
//! Every publisher mutation is a compare-and-swap on the row's `version`: the
//! caller hands back the record it read, the next state is computed by the
//! pure transitions on [`OutboxRecord`], and the write only lands if nobody
//! else moved the row in between. A lost race is reported as
//! [`Transition::Conflict`], never as an error.

pub mod inmemory_store;
pub mod pg_outbox_repo;

pub use inmemory_store::InMemoryOutboxStore;
pub use pg_outbox_repo::{insert_outbox_event, PgOutboxStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backoff::BackoffPolicy;
use crate::error::OutboxError;
use crate::models::{FailureKind, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts, Transition};

/// How many times a redrive re-reads a row that moved underneath it
const REDRIVE_ATTEMPTS: usize = 3;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new PENDING record
    ///
    /// Fails with [`OutboxError::DuplicateEvent`] if `event_id` already exists;
    /// the existing row is left untouched.
    async fn insert(&self, event: &NewOutboxEvent) -> Result<OutboxRecord, OutboxError>;

    /// Up to `limit` PENDING/RETRY records due at `now`, oldest first
    async fn select_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Persist `next` only if the row still carries `seen.version` and `seen.status`
    async fn compare_and_swap(
        &self,
        seen: &OutboxRecord,
        next: &OutboxRecord,
    ) -> Result<Transition, OutboxError>;

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, OutboxError>;

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError>;

    /// Records sharing a correlation id, oldest first
    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<OutboxRecord>, OutboxError>;

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<OutboxRecord>, OutboxError>;

    /// Delete at most `limit` PUBLISHED records with `published_at < cutoff`
    ///
    /// Returns the number of rows deleted. Never touches any other status.
    async fn delete_published_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, OutboxError>;

    /// Retry policy applied by [`OutboxStore::mark_failed`]
    fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::default()
    }

    /// Record a successful delivery of `seen`
    async fn mark_published(
        &self,
        seen: &OutboxRecord,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let next = seen.published(now)?;
        self.compare_and_swap(seen, &next).await
    }

    /// Record a failed delivery attempt of `seen`
    async fn mark_failed(
        &self,
        seen: &OutboxRecord,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<Transition, OutboxError> {
        let next = seen.failed(error, kind, &self.backoff_policy(), now)?;
        self.compare_and_swap(seen, &next).await
    }

    /// Move a DEAD_LETTER record back to PENDING with a fresh budget
    async fn redrive(&self, id: i64) -> Result<OutboxRecord, OutboxError> {
        for _ in 0..REDRIVE_ATTEMPTS {
            let current = self
                .find_by_id(id)
                .await?
                .ok_or(OutboxError::NotFound(id))?;
            let next = current.redriven()?;

            if let Transition::Applied(record) = self.compare_and_swap(&current, &next).await? {
                return Ok(record);
            }
        }

        Err(OutboxError::Store(format!(
            "outbox record id={} kept changing during redrive",
            id
        )))
    }
}
