//! Error types for the outbox store, producer and envelope construction

use thiserror::Error;

use crate::models::OutboxStatus;

/// Errors raised while building an event envelope
///
/// Construction runs inside the business transaction, so any of these
/// rejects the transaction before a half-formed row can be written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Serialization(err.to_string())
    }
}

/// Errors that can occur during outbox store and producer operations
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The idempotency key was already enqueued. Producers treat this as
    /// success: the first write is the one that counts.
    #[error("Duplicate event: event_id={0} already enqueued")]
    DuplicateEvent(String),

    #[error("Invalid event envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Outbox record not found: id={0}")]
    NotFound(i64),

    #[error("Invalid transition for outbox record id={id}: cannot {action} from {status}")]
    InvalidTransition {
        id: i64,
        status: OutboxStatus,
        action: &'static str,
    },

    #[error("Corrupt outbox row id={id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl OutboxError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, OutboxError::DuplicateEvent(_))
    }
}

/// Postgres SQLSTATE for unique_violation
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// Map an insert error, turning a unique violation on `event_id` into
/// [`OutboxError::DuplicateEvent`]
pub(crate) fn map_insert_error(err: sqlx::Error, event_id: &str) -> OutboxError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return OutboxError::DuplicateEvent(event_id.to_string());
        }
    }
    OutboxError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_recognised() {
        assert!(OutboxError::DuplicateEvent("e1".to_string()).is_duplicate());
        assert!(!OutboxError::NotFound(1).is_duplicate());
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        let err = map_insert_error(sqlx::Error::RowNotFound, "e1");
        assert!(matches!(err, OutboxError::Database(_)));
    }

    #[test]
    fn transition_error_message_names_the_status() {
        let err = OutboxError::InvalidTransition {
            id: 7,
            status: OutboxStatus::Published,
            action: "redrive",
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for outbox record id=7: cannot redrive from PUBLISHED"
        );
    }
}
