//! Postgres-backed outbox store
//!
//! Uses the transactional outbox pattern: [`insert_outbox_event`] writes the
//! envelope inside the caller's transaction so it commits (or rolls back)
//! together with the domain change it describes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::OutboxStore;
use crate::backoff::BackoffPolicy;
use crate::error::{map_insert_error, OutboxError};
use crate::models::{EventType, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts, Transition};
use crate::producer::ProducerDefaults;

const RECORD_COLUMNS: &str = r#"
    id, event_id, event_type, event_name, aggregate_id, aggregate_type,
    payload, metadata, schema_version, source, correlation_id, causation_id,
    user_id, trace_id, created_at, status, retry_count, max_retries,
    next_retry_at, published_at, last_error, version
"#;

/// Raw `events_outbox` row
#[derive(Debug, Clone, FromRow)]
struct OutboxRow {
    id: i64,
    event_id: String,
    event_type: String,
    event_name: String,
    aggregate_id: String,
    aggregate_type: String,
    payload: String,
    metadata: Option<String>,
    schema_version: String,
    source: String,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    user_id: Option<String>,
    trace_id: Option<String>,
    created_at: DateTime<Utc>,
    status: String,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    version: i64,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let event_type: EventType = row
            .event_type
            .parse()
            .map_err(|reason| OutboxError::CorruptRow { id: row.id, reason })?;
        let status: OutboxStatus = row
            .status
            .parse()
            .map_err(|reason| OutboxError::CorruptRow { id: row.id, reason })?;

        Ok(OutboxRecord {
            id: row.id,
            event_id: row.event_id,
            event_type,
            event_name: row.event_name,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            payload: row.payload,
            metadata: row.metadata,
            schema_version: row.schema_version,
            source: row.source,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            user_id: row.user_id,
            trace_id: row.trace_id,
            created_at: row.created_at,
            status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            published_at: row.published_at,
            last_error: row.last_error,
            version: row.version,
        })
    }
}

fn into_records(rows: Vec<OutboxRow>) -> Result<Vec<OutboxRecord>, OutboxError> {
    rows.into_iter().map(OutboxRecord::try_from).collect()
}

/// Insert an event into the outbox for later publishing
///
/// Runs inside the caller's transaction. A duplicate `event_id` comes back as
/// [`OutboxError::DuplicateEvent`]; note that Postgres aborts the surrounding
/// transaction on a unique violation, so callers that want to carry on must
/// wrap the insert in a savepoint (see `OutboxProducer::enqueue_in_tx`).
pub async fn insert_outbox_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewOutboxEvent,
) -> Result<OutboxRecord, OutboxError> {
    event.validate()?;

    let query = format!(
        r#"
        INSERT INTO events_outbox
            (event_id, event_type, event_name, aggregate_id, aggregate_type,
             payload, metadata, schema_version, source, correlation_id,
             causation_id, user_id, trace_id, max_retries)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {RECORD_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, OutboxRow>(&query)
        .bind(&event.event_id)
        .bind(event.event_type.as_str())
        .bind(event.event_name())
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.resolved_schema_version())
        .bind(event.resolved_source())
        .bind(&event.correlation_id)
        .bind(&event.causation_id)
        .bind(&event.user_id)
        .bind(&event.trace_id)
        .bind(event.resolved_max_retries())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, &event.event_id))?;

    row.try_into()
}

/// [`OutboxStore`] on a Postgres pool
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
    backoff: BackoffPolicy,
    defaults: ProducerDefaults,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            backoff: BackoffPolicy::default(),
            defaults: ProducerDefaults::default(),
        }
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

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, event: &NewOutboxEvent) -> Result<OutboxRecord, OutboxError> {
        let event = self.defaults.apply(event.clone());
        let mut tx = self.pool.begin().await?;
        let record = insert_outbox_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn select_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        // No row locks: concurrent publishers are arbitrated by the version CAS
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM events_outbox
            WHERE status IN ('PENDING', 'RETRY')
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, OutboxRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn compare_and_swap(
        &self,
        seen: &OutboxRecord,
        next: &OutboxRecord,
    ) -> Result<Transition, OutboxError> {
        let query = format!(
            r#"
            UPDATE events_outbox
            SET status = $4,
                retry_count = $5,
                next_retry_at = $6,
                published_at = $7,
                last_error = $8,
                version = $9
            WHERE id = $1 AND version = $2 AND status = $3
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, OutboxRow>(&query)
            .bind(seen.id)
            .bind(seen.version)
            .bind(seen.status.as_str())
            .bind(next.status.as_str())
            .bind(next.retry_count)
            .bind(next.next_retry_at)
            .bind(next.published_at)
            .bind(&next.last_error)
            .bind(next.version)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Transition::Applied(row.try_into()?)),
            None => Ok(Transition::Conflict),
        }
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, OutboxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events_outbox WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM events_outbox GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status: OutboxStatus = status.parse().map_err(OutboxError::Store)?;
            counts.set(status, count);
        }
        Ok(counts)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM events_outbox
            WHERE correlation_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        );

        let rows = sqlx::query_as::<_, OutboxRow>(&query)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<OutboxRecord>, OutboxError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM events_outbox WHERE id = $1");

        sqlx::query_as::<_, OutboxRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxRecord::try_from)
            .transpose()
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<OutboxRecord>, OutboxError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM events_outbox WHERE event_id = $1");

        sqlx::query_as::<_, OutboxRow>(&query)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxRecord::try_from)
            .transpose()
    }

    async fn delete_published_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM events_outbox
            WHERE id IN (
                SELECT id FROM events_outbox
                WHERE status = 'PUBLISHED'
                  AND published_at < $1
                ORDER BY published_at ASC
                LIMIT $2
            )
            AND status = 'PUBLISHED'
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff
    }
}
