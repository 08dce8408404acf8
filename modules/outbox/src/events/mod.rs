//! Per-aggregate envelope construction
//!
//! Each business aggregate owns a plain snapshot type and a handful of pure
//! mapping functions that turn a snapshot into a [`NewOutboxEvent`]. They
//! run synchronously inside the business transaction, before the insert, and
//! do no I/O. A blank required field rejects construction.

pub mod customer;
pub mod invoice;
pub mod order;
pub mod payment;
pub mod subscription;

use serde::Serialize;
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

/// Identifiers stamped onto the envelope of one emitted event.
///
/// The correlation, causation, user and trace ids are request-scoped and a
/// context carrying only those may be shared by every event a transaction
/// emits. `event_id` is the idempotency key of a single event: set it only on
/// a context built for that event, since reusing it makes later events
/// duplicates of the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    /// Per-event idempotency key; a fresh UUID when not supplied
    pub event_id: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Build the envelope for one aggregate fact
pub(crate) fn build_event<T: Serialize>(
    event_type: EventType,
    aggregate_id: &str,
    payload: &T,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    let event_id = ctx
        .event_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    NewOutboxEvent::builder(event_type, aggregate_id)
        .event_id(event_id)
        .payload(payload)?
        .correlation_id(ctx.correlation_id.clone())
        .causation_id(ctx.causation_id.clone())
        .user_id(ctx.user_id.clone())
        .trace_id(ctx.trace_id.clone())
        .build()
}

/// Reject blank required snapshot fields
pub(crate) fn require(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.trim().is_empty() {
        return Err(EnvelopeError::MissingField(field));
    }
    Ok(())
}

/// Reject negative money amounts
pub(crate) fn require_non_negative(field: &'static str, amount_cents: i64) -> Result<(), EnvelopeError> {
    if amount_cents < 0 {
        return Err(EnvelopeError::InvalidField {
            field,
            reason: format!("must not be negative, got {}", amount_cents),
        });
    }
    Ok(())
}
