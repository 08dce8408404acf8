//! In-memory implementation of the OutboxStore trait for testing and development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::OutboxStore;
use crate::backoff::BackoffPolicy;
use crate::error::OutboxError;
use crate::models::{NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts, Transition};
use crate::producer::ProducerDefaults;

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, OutboxRecord>,
    by_event_id: HashMap<String, i64>,
}

/// OutboxStore kept in a mutex-guarded map
///
/// Same semantics as the Postgres store (unique `event_id`, version
/// compare-and-swap, bounded deletes) without durability. Clones share state,
/// so a test can hold one handle while the publisher works on another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    inner: Arc<Mutex<Inner>>,
    backoff: BackoffPolicy,
    defaults: ProducerDefaults,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Source and retry budget for events that leave them unset
    pub fn with_defaults(mut self, defaults: ProducerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Insert with an explicit creation time
    pub fn insert_at(
        &self,
        event: &NewOutboxEvent,
        created_at: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxError> {
        let event = self.defaults.apply(event.clone());
        event.validate()?;

        let mut inner = self.lock()?;
        if inner.by_event_id.contains_key(&event.event_id) {
            return Err(OutboxError::DuplicateEvent(event.event_id.clone()));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let record = OutboxRecord::from_new(id, &event, created_at);

        inner.by_event_id.insert(record.event_id.clone(), id);
        inner.rows.insert(id, record.clone());
        Ok(record)
    }

    /// Snapshot of every stored record, by id
    pub fn records(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        Ok(self.lock()?.rows.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, OutboxError> {
        self.inner
            .lock()
            .map_err(|_| OutboxError::Store("in-memory outbox lock poisoned".to_string()))
    }
}

fn sorted_by_creation(mut records: Vec<OutboxRecord>) -> Vec<OutboxRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    records
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, event: &NewOutboxEvent) -> Result<OutboxRecord, OutboxError> {
        self.insert_at(event, Utc::now())
    }

    async fn select_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let inner = self.lock()?;
        let due = inner
            .rows
            .values()
            .filter(|r| r.is_deliverable_at(now))
            .cloned()
            .collect();

        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(sorted_by_creation(due).into_iter().take(limit).collect())
    }

    async fn compare_and_swap(
        &self,
        seen: &OutboxRecord,
        next: &OutboxRecord,
    ) -> Result<Transition, OutboxError> {
        let mut inner = self.lock()?;
        let Some(current) = inner.rows.get_mut(&seen.id) else {
            return Ok(Transition::Conflict);
        };

        if current.version != seen.version || current.status != seen.status {
            return Ok(Transition::Conflict);
        }

        current.status = next.status;
        current.retry_count = next.retry_count;
        current.next_retry_at = next.next_retry_at;
        current.published_at = next.published_at;
        current.last_error = next.last_error.clone();
        current.version = next.version;

        Ok(Transition::Applied(current.clone()))
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, OutboxError> {
        let inner = self.lock()?;
        Ok(inner.rows.values().filter(|r| r.status == status).count() as i64)
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for record in inner.rows.values() {
            counts.set(record.status, counts.get(record.status) + 1);
        }
        Ok(counts)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let inner = self.lock()?;
        let matches = inner
            .rows
            .values()
            .filter(|r| r.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect();
        Ok(sorted_by_creation(matches))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<OutboxRecord>, OutboxError> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<OutboxRecord>, OutboxError> {
        let inner = self.lock()?;
        Ok(inner
            .by_event_id
            .get(event_id)
            .and_then(|id| inner.rows.get(id))
            .cloned())
    }

    async fn delete_published_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, OutboxError> {
        let mut inner = self.lock()?;

        let mut expired: Vec<(DateTime<Utc>, i64)> = inner
            .rows
            .values()
            .filter(|r| r.status == OutboxStatus::Published)
            .filter_map(|r| r.published_at.filter(|at| *at < cutoff).map(|at| (at, r.id)))
            .collect();
        expired.sort();
        expired.truncate(usize::try_from(limit).unwrap_or(0));

        for (_, id) in &expired {
            if let Some(record) = inner.rows.remove(id) {
                inner.by_event_id.remove(&record.event_id);
            }
        }

        Ok(expired.len() as u64)
    }

    fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, FailureKind};

    fn event(event_id: &str) -> NewOutboxEvent {
        NewOutboxEvent::builder(EventType::CustomerCreated, "cust-1")
            .event_id(event_id)
            .raw_payload(r#"{"name":"Ada"}"#)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn ids_are_assigned_in_insert_order() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert(&event("a")).await.unwrap();
        let b = store.insert(&event("b")).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.status, OutboxStatus::Pending);
        assert_eq!(a.version, 0);
    }

    #[tokio::test]
    async fn configured_defaults_reach_stored_rows() {
        let store = InMemoryOutboxStore::new().with_defaults(ProducerDefaults {
            source: "urn:crm".to_string(),
            max_retries: 6,
        });

        let record = store.insert(&event("a")).await.unwrap();
        assert_eq!(record.source, "urn:crm");
        assert_eq!(record.max_retries, 6);

        let mut explicit = event("b");
        explicit.max_retries = Some(2);
        assert_eq!(store.insert(&explicit).await.unwrap().max_retries, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryOutboxStore::new();
        let seen = store.insert(&event("a")).await.unwrap();
        let now = Utc::now();

        assert!(store.mark_published(&seen, now).await.unwrap().is_applied());
        let again = store
            .mark_failed(&seen, "late", FailureKind::Transient, now)
            .await
            .unwrap();

        assert_eq!(again, Transition::Conflict);
        let stored = store.find_by_id(seen.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Published);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn deleted_rows_free_their_event_id_lookup() {
        let store = InMemoryOutboxStore::new();
        let seen = store.insert(&event("a")).await.unwrap();
        let now = Utc::now();
        store.mark_published(&seen, now).await.unwrap();

        let deleted = store
            .delete_published_older_than(now + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.find_by_event_id("a").await.unwrap().is_none());
    }
}
