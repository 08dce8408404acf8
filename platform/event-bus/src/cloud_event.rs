//! # CloudEvent wire envelope
//!
//! Structured-mode CloudEvents 1.0 document used for every message the outbox
//! publisher puts on the bus.
//!
//! ## Envelope Fields
//!
//! - `id`: the producer's idempotency key (`event_id` of the outbox row)
//! - `type`: human-readable event name (e.g. `OrderCreated`)
//! - `source`: URI of the producing system
//! - `time`: when the fact was recorded (outbox `created_at`)
//! - `datacontenttype`: always `application/json`
//! - `subject`: the aggregate the fact concerns
//! - `data`: the business payload
//!
//! Correlation, causation, tracing and provenance travel as CloudEvents
//! extension attributes (lower-case, alphanumeric names). Extension values
//! must be primitives, so structured metadata is carried as JSON text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// CloudEvents 1.0 structured envelope
///
/// # Examples
///
/// ```rust
/// use event_bus::CloudEvent;
/// use serde_json::json;
///
/// let event = CloudEvent::new(
///     "0b6f4d0e-4a4e-4c55-9d1c-0d8f3d0f9a11",
///     "OrderCreated",
///     "urn:droid:bss:event-publisher",
///     chrono::Utc::now(),
///     json!({"order_number": "ORD-001"}),
/// )
/// .with_subject("order-42")
/// .with_correlation_id(Some("req-7".to_string()));
///
/// assert_eq!(event.specversion, "1.0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,

    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub source: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub time: DateTime<Utc>,

    pub datacontenttype: String,

    pub data: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlationid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub causationid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub userid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregatetype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schemaversion: Option<String>,

    /// Side-channel metadata (feature flags, tracing baggage) as JSON text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl CloudEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        time: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            specversion: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            id: id.into(),
            event_type: event_type.into(),
            source: source.into(),
            subject: None,
            time,
            datacontenttype: JSON_CONTENT_TYPE.to_string(),
            data,
            correlationid: None,
            causationid: None,
            traceid: None,
            userid: None,
            aggregatetype: None,
            schemaversion: None,
            metadata: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlationid = correlation_id;
        self
    }

    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causationid = causation_id;
        self
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.traceid = trace_id;
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.userid = user_id;
        self
    }

    pub fn with_aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregatetype = Some(aggregate_type.into());
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schemaversion = Some(schema_version.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Serialize to the structured-mode JSON body
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Validate a received CloudEvent document without knowing its payload type
///
/// # Validation Rules
///
/// - `specversion` must be `1.0`
/// - `id`, `type`, `source` must be non-empty strings
/// - `time` must be present
/// - every attribute other than `data` must be a primitive (no objects or
///   arrays), as CloudEvents 1.0 requires of extension values
///
/// # Errors
///
/// Returns a descriptive error string if validation fails
pub fn validate_cloud_event(event: &serde_json::Value) -> Result<(), String> {
    let specversion = event
        .get("specversion")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid specversion")?;

    if specversion != CLOUD_EVENTS_SPEC_VERSION {
        return Err(format!("Unsupported specversion: {}", specversion));
    }

    for field in ["id", "type", "source"] {
        let value = event
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Missing or invalid {}", field))?;

        if value.is_empty() {
            return Err(format!("{} cannot be empty", field));
        }
    }

    event
        .get("time")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid time")?;

    let attributes = event.as_object().ok_or("CloudEvent must be a JSON object")?;
    for (name, value) in attributes {
        if name != "data" && (value.is_object() || value.is_array()) {
            return Err(format!("Attribute {} must be a primitive value", name));
        }
    }

    Ok(())
}
