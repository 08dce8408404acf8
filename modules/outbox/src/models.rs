//! Outbox record model, event type catalogue and the delivery state machine
//!
//! ```text
//!   PENDING ──fail──▶ RETRY ──fail──▶ RETRY … ──fail (budget used)──▶ DEAD_LETTER
//!      │                 │                                               │
//!      └────publish──────┴──────────────publish──────▶ PUBLISHED         │
//!                                                                        │
//!   PENDING ◀──────────────────────── redrive (operator) ────────────────┘
//! ```
//!
//! Every transition is a pure function of the record as it was read; the
//! store persists the result only if the row's `version` is still the one the
//! transition started from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::{EnvelopeError, OutboxError};

/// Retry budget applied when neither the producer nor the event overrides it
pub const DEFAULT_MAX_RETRIES: i32 = 3;

pub const DEFAULT_SOURCE: &str = "urn:droid:bss:event-publisher";

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Longest `last_error` kept on a row
pub const MAX_ERROR_LEN: usize = 2000;

const MAX_EVENT_ID_LEN: usize = 64;

// ============================================================================
// Status
// ============================================================================

/// Delivery status of an outbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Retry,
    DeadLetter,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 4] = [
        OutboxStatus::Pending,
        OutboxStatus::Published,
        OutboxStatus::Retry,
        OutboxStatus::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Retry => "RETRY",
            OutboxStatus::DeadLetter => "DEAD_LETTER",
        }
    }

    /// PUBLISHED and DEAD_LETTER absorb every publisher transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::DeadLetter)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutboxStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown outbox status: {}", s))
    }
}

// ============================================================================
// Event types
// ============================================================================

/// Closed catalogue of business facts the outbox can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    CustomerCreated,
    CustomerUpdated,
    CustomerDeleted,
    CustomerStatusChanged,
    AddressCreated,
    AddressUpdated,
    AddressCancelled,
    ProductCreated,
    ProductUpdated,
    OrderCreated,
    OrderUpdated,
    OrderStatusChanged,
    OrderCancelled,
    OrderCompleted,
    PaymentProcessed,
    PaymentCompleted,
    PaymentFailed,
    PaymentRefunded,
    InvoiceCreated,
    InvoiceSent,
    InvoicePaid,
    InvoiceOverdue,
    InvoiceCancelled,
    SubscriptionCreated,
    SubscriptionActivated,
    SubscriptionRenewed,
    SubscriptionSuspended,
    SubscriptionCancelled,
    FraudAlertRaised,
    FraudAlertResolved,
    WorkOrderCreated,
    WorkOrderCompleted,
    PartnerSettlementCompleted,
}

/// code, event name, topic suffix, aggregate type
type EventDescriptor = (&'static str, &'static str, &'static str, &'static str);

impl EventType {
    pub const ALL: [EventType; 33] = [
        EventType::CustomerCreated,
        EventType::CustomerUpdated,
        EventType::CustomerDeleted,
        EventType::CustomerStatusChanged,
        EventType::AddressCreated,
        EventType::AddressUpdated,
        EventType::AddressCancelled,
        EventType::ProductCreated,
        EventType::ProductUpdated,
        EventType::OrderCreated,
        EventType::OrderUpdated,
        EventType::OrderStatusChanged,
        EventType::OrderCancelled,
        EventType::OrderCompleted,
        EventType::PaymentProcessed,
        EventType::PaymentCompleted,
        EventType::PaymentFailed,
        EventType::PaymentRefunded,
        EventType::InvoiceCreated,
        EventType::InvoiceSent,
        EventType::InvoicePaid,
        EventType::InvoiceOverdue,
        EventType::InvoiceCancelled,
        EventType::SubscriptionCreated,
        EventType::SubscriptionActivated,
        EventType::SubscriptionRenewed,
        EventType::SubscriptionSuspended,
        EventType::SubscriptionCancelled,
        EventType::FraudAlertRaised,
        EventType::FraudAlertResolved,
        EventType::WorkOrderCreated,
        EventType::WorkOrderCompleted,
        EventType::PartnerSettlementCompleted,
    ];

    fn descriptor(&self) -> EventDescriptor {
        use EventType::*;
        match self {
            CustomerCreated => ("CUSTOMER_CREATED", "CustomerCreated", "customer.created", "Customer"),
            CustomerUpdated => ("CUSTOMER_UPDATED", "CustomerUpdated", "customer.updated", "Customer"),
            CustomerDeleted => ("CUSTOMER_DELETED", "CustomerDeleted", "customer.deleted", "Customer"),
            CustomerStatusChanged => (
                "CUSTOMER_STATUS_CHANGED",
                "CustomerStatusChanged",
                "customer.status_changed",
                "Customer",
            ),
            AddressCreated => ("ADDRESS_CREATED", "AddressCreated", "address.created", "Address"),
            AddressUpdated => ("ADDRESS_UPDATED", "AddressUpdated", "address.updated", "Address"),
            AddressCancelled => ("ADDRESS_CANCELLED", "AddressCancelled", "address.cancelled", "Address"),
            ProductCreated => ("PRODUCT_CREATED", "ProductCreated", "product.created", "Product"),
            ProductUpdated => ("PRODUCT_UPDATED", "ProductUpdated", "product.updated", "Product"),
            OrderCreated => ("ORDER_CREATED", "OrderCreated", "order.created", "Order"),
            OrderUpdated => ("ORDER_UPDATED", "OrderUpdated", "order.updated", "Order"),
            OrderStatusChanged => (
                "ORDER_STATUS_CHANGED",
                "OrderStatusChanged",
                "order.status_changed",
                "Order",
            ),
            OrderCancelled => ("ORDER_CANCELLED", "OrderCancelled", "order.cancelled", "Order"),
            OrderCompleted => ("ORDER_COMPLETED", "OrderCompleted", "order.completed", "Order"),
            PaymentProcessed => ("PAYMENT_PROCESSED", "PaymentProcessed", "payment.processed", "Payment"),
            PaymentCompleted => ("PAYMENT_COMPLETED", "PaymentCompleted", "payment.completed", "Payment"),
            PaymentFailed => ("PAYMENT_FAILED", "PaymentFailed", "payment.failed", "Payment"),
            PaymentRefunded => ("PAYMENT_REFUNDED", "PaymentRefunded", "payment.refunded", "Payment"),
            InvoiceCreated => ("INVOICE_CREATED", "InvoiceCreated", "invoice.created", "Invoice"),
            InvoiceSent => ("INVOICE_SENT", "InvoiceSent", "invoice.sent", "Invoice"),
            InvoicePaid => ("INVOICE_PAID", "InvoicePaid", "invoice.paid", "Invoice"),
            InvoiceOverdue => ("INVOICE_OVERDUE", "InvoiceOverdue", "invoice.overdue", "Invoice"),
            InvoiceCancelled => ("INVOICE_CANCELLED", "InvoiceCancelled", "invoice.cancelled", "Invoice"),
            SubscriptionCreated => (
                "SUBSCRIPTION_CREATED",
                "SubscriptionCreated",
                "subscription.created",
                "Subscription",
            ),
            SubscriptionActivated => (
                "SUBSCRIPTION_ACTIVATED",
                "SubscriptionActivated",
                "subscription.activated",
                "Subscription",
            ),
            SubscriptionRenewed => (
                "SUBSCRIPTION_RENEWED",
                "SubscriptionRenewed",
                "subscription.renewed",
                "Subscription",
            ),
            SubscriptionSuspended => (
                "SUBSCRIPTION_SUSPENDED",
                "SubscriptionSuspended",
                "subscription.suspended",
                "Subscription",
            ),
            SubscriptionCancelled => (
                "SUBSCRIPTION_CANCELLED",
                "SubscriptionCancelled",
                "subscription.cancelled",
                "Subscription",
            ),
            FraudAlertRaised => ("FRAUD_ALERT_RAISED", "FraudAlertRaised", "fraud.alert_raised", "FraudAlert"),
            FraudAlertResolved => (
                "FRAUD_ALERT_RESOLVED",
                "FraudAlertResolved",
                "fraud.alert_resolved",
                "FraudAlert",
            ),
            WorkOrderCreated => ("WORK_ORDER_CREATED", "WorkOrderCreated", "work_order.created", "WorkOrder"),
            WorkOrderCompleted => (
                "WORK_ORDER_COMPLETED",
                "WorkOrderCompleted",
                "work_order.completed",
                "WorkOrder",
            ),
            PartnerSettlementCompleted => (
                "PARTNER_SETTLEMENT_COMPLETED",
                "PartnerSettlementCompleted",
                "partner.settlement_completed",
                "PartnerSettlement",
            ),
        }
    }

    /// Stored form, e.g. `ORDER_CREATED`
    pub fn as_str(&self) -> &'static str {
        self.descriptor().0
    }

    /// Human-readable label, e.g. `OrderCreated`
    pub fn event_name(&self) -> &'static str {
        self.descriptor().1
    }

    /// Dotted suffix appended to the topic prefix, e.g. `order.created`
    pub fn topic_suffix(&self) -> &'static str {
        self.descriptor().2
    }

    /// Aggregate the fact belongs to, e.g. `Order`
    pub fn aggregate_type(&self) -> &'static str {
        self.descriptor().3
    }

    /// Full broker subject for this event type
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.topic_suffix())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

// ============================================================================
// New events (producer side)
// ============================================================================

/// An event envelope ready to be written to the outbox
///
/// Built by business code (usually through the per-aggregate helpers in
/// [`crate::events`]) and never mutated once enqueued. `source`,
/// `schema_version` and `max_retries` fall back to the producer's defaults
/// when left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Opaque serialized business data (JSON text)
    pub payload: String,
    /// Opaque serialized side-channel data (JSON text)
    pub metadata: Option<String>,
    pub schema_version: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
    pub max_retries: Option<i32>,
}

impl NewOutboxEvent {
    /// Start building an event for `aggregate_id`
    ///
    /// The aggregate type defaults to the one implied by `event_type`.
    pub fn builder(event_type: EventType, aggregate_id: impl Into<String>) -> NewOutboxEventBuilder {
        NewOutboxEventBuilder {
            event: NewOutboxEvent {
                event_id: String::new(),
                event_type,
                aggregate_id: aggregate_id.into(),
                aggregate_type: event_type.aggregate_type().to_string(),
                payload: String::new(),
                metadata: None,
                schema_version: None,
                source: None,
                correlation_id: None,
                causation_id: None,
                user_id: None,
                trace_id: None,
                max_retries: None,
            },
        }
    }

    /// Check the fields every stored row depends on
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event_id.trim().is_empty() {
            return Err(EnvelopeError::MissingField("event_id"));
        }
        if self.event_id.len() > MAX_EVENT_ID_LEN {
            return Err(EnvelopeError::InvalidField {
                field: "event_id",
                reason: format!("longer than {} characters", MAX_EVENT_ID_LEN),
            });
        }
        if self.aggregate_id.trim().is_empty() {
            return Err(EnvelopeError::MissingField("aggregate_id"));
        }
        if self.aggregate_type.trim().is_empty() {
            return Err(EnvelopeError::MissingField("aggregate_type"));
        }
        if self.payload.trim().is_empty() {
            return Err(EnvelopeError::MissingField("payload"));
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries < 1 {
                return Err(EnvelopeError::InvalidField {
                    field: "max_retries",
                    reason: format!("must be at least 1, got {}", max_retries),
                });
            }
        }
        Ok(())
    }

    pub fn event_name(&self) -> &'static str {
        self.event_type.event_name()
    }

    pub fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    pub fn resolved_schema_version(&self) -> &str {
        self.schema_version.as_deref().unwrap_or(DEFAULT_SCHEMA_VERSION)
    }

    pub fn resolved_max_retries(&self) -> i32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }
}

/// Builder for [`NewOutboxEvent`]
#[derive(Debug, Clone)]
pub struct NewOutboxEventBuilder {
    event: NewOutboxEvent,
}

impl NewOutboxEventBuilder {
    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event.event_id = event_id.into();
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.event.aggregate_type = aggregate_type.into();
        self
    }

    /// Use pre-serialized payload text as-is
    pub fn raw_payload(mut self, payload: impl Into<String>) -> Self {
        self.event.payload = payload.into();
        self
    }

    /// Serialize `payload` to JSON text
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, EnvelopeError> {
        self.event.payload = serde_json::to_string(payload)?;
        Ok(self)
    }

    /// Serialize `metadata` to JSON text
    pub fn metadata<T: Serialize>(mut self, metadata: &T) -> Result<Self, EnvelopeError> {
        self.event.metadata = Some(serde_json::to_string(metadata)?);
        Ok(self)
    }

    pub fn raw_metadata(mut self, metadata: Option<String>) -> Self {
        self.event.metadata = metadata;
        self
    }

    pub fn schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.event.schema_version = Some(schema_version.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.event.source = Some(source.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.event.correlation_id = correlation_id;
        self
    }

    pub fn causation_id(mut self, causation_id: Option<String>) -> Self {
        self.event.causation_id = causation_id;
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.event.user_id = user_id;
        self
    }

    pub fn trace_id(mut self, trace_id: Option<String>) -> Self {
        self.event.trace_id = trace_id;
        self
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.event.max_retries = Some(max_retries);
        self
    }

    /// Validate and return the event
    pub fn build(self) -> Result<NewOutboxEvent, EnvelopeError> {
        self.event.validate()?;
        Ok(self.event)
    }
}

// ============================================================================
// Stored records
// ============================================================================

/// How a failed delivery attempt should be charged against the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Broker timeout, refusal or reject: costs one retry
    Transient,
    /// The record can never be delivered as stored: uses up the whole budget
    Permanent,
}

/// One row of the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_id: String,
    pub event_type: EventType,
    pub event_name: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub payload: String,
    pub metadata: Option<String>,
    pub schema_version: String,
    pub source: String,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Bumped by every mutation; the compare-and-swap token
    pub version: i64,
}

impl OutboxRecord {
    /// Materialize a freshly inserted row
    pub fn from_new(id: i64, event: &NewOutboxEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            event_name: event.event_name().to_string(),
            aggregate_id: event.aggregate_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            payload: event.payload.clone(),
            metadata: event.metadata.clone(),
            schema_version: event.resolved_schema_version().to_string(),
            source: event.resolved_source().to_string(),
            correlation_id: event.correlation_id.clone(),
            causation_id: event.causation_id.clone(),
            user_id: event.user_id.clone(),
            trace_id: event.trace_id.clone(),
            created_at,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: event.resolved_max_retries(),
            next_retry_at: None,
            published_at: None,
            last_error: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the publisher may attempt this record at `now`
    pub fn is_deliverable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OutboxStatus::Pending | OutboxStatus::Retry)
            && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Record a successful delivery
    pub fn published(&self, now: DateTime<Utc>) -> Result<OutboxRecord, OutboxError> {
        self.ensure_open("mark published")?;

        Ok(OutboxRecord {
            status: OutboxStatus::Published,
            published_at: Some(now),
            next_retry_at: None,
            last_error: None,
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Record a failed delivery attempt
    ///
    /// A transient failure costs one retry and schedules the next attempt via
    /// `policy`; a permanent failure uses up the budget at once. Either way,
    /// reaching `max_retries` dead-letters the record.
    pub fn failed(
        &self,
        error: &str,
        kind: FailureKind,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxError> {
        self.ensure_open("mark failed")?;

        let retry_count = match kind {
            FailureKind::Transient => (self.retry_count + 1).min(self.max_retries),
            FailureKind::Permanent => self.max_retries,
        };

        let (status, next_retry_at) = if policy.is_exhausted(retry_count, self.max_retries) {
            (OutboxStatus::DeadLetter, None)
        } else {
            (
                OutboxStatus::Retry,
                Some(add_delay(now, policy.delay_for(retry_count))),
            )
        };

        Ok(OutboxRecord {
            status,
            retry_count,
            next_retry_at,
            last_error: Some(truncate_error(error)),
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Operator recovery: put a dead-lettered record back in the queue
    ///
    /// `last_error` is kept so the operator can still see why it failed.
    pub fn redriven(&self) -> Result<OutboxRecord, OutboxError> {
        if self.status != OutboxStatus::DeadLetter {
            return Err(OutboxError::InvalidTransition {
                id: self.id,
                status: self.status,
                action: "redrive",
            });
        }

        Ok(OutboxRecord {
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            version: self.version + 1,
            ..self.clone()
        })
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), OutboxError> {
        if self.is_terminal() {
            return Err(OutboxError::InvalidTransition {
                id: self.id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }
}

/// Outcome of a conditional status update
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The row still matched what was read and now holds the new state
    Applied(OutboxRecord),
    /// The row changed (or disappeared) since it was read; nothing written
    Conflict,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Number of records per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub retry: i64,
    pub published: i64,
    pub dead_letter: i64,
}

impl StatusCounts {
    pub fn get(&self, status: OutboxStatus) -> i64 {
        match status {
            OutboxStatus::Pending => self.pending,
            OutboxStatus::Retry => self.retry,
            OutboxStatus::Published => self.published,
            OutboxStatus::DeadLetter => self.dead_letter,
        }
    }

    pub fn set(&mut self, status: OutboxStatus, count: i64) {
        match status {
            OutboxStatus::Pending => self.pending = count,
            OutboxStatus::Retry => self.retry = count,
            OutboxStatus::Published => self.published = count,
            OutboxStatus::DeadLetter => self.dead_letter = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.retry + self.published + self.dead_letter
    }
}

pub(crate) fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}
