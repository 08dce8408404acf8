//! Outbox record → broker message
//!
//! The topic is `{prefix}.{topic_suffix}` for the record's event type, the
//! body is a structured CloudEvent and the `event_id` rides along in the
//! message-id header so the broker and consumers can drop redeliveries.

use event_bus::{BusMessage, CloudEvent, MSG_ID_HEADER};

use crate::error::EnvelopeError;
use crate::models::OutboxRecord;

pub const DEFAULT_TOPIC_PREFIX: &str = "bss.events";

/// Build the CloudEvent for a stored record
///
/// Payload and metadata are stored as text; either failing to parse as JSON
/// makes the record undeliverable as stored. Metadata goes on the wire as a
/// compact JSON string extension.
pub fn to_cloud_event(record: &OutboxRecord) -> Result<CloudEvent, EnvelopeError> {
    let data: serde_json::Value = serde_json::from_str(&record.payload)
        .map_err(|e| EnvelopeError::Serialization(format!("payload: {}", e)))?;

    let metadata = record
        .metadata
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| EnvelopeError::Serialization(format!("metadata: {}", e)))?
        .map(|value| value.to_string());

    Ok(CloudEvent::new(
        record.event_id.clone(),
        record.event_name.clone(),
        record.source.clone(),
        record.created_at,
        data,
    )
    .with_subject(record.aggregate_id.clone())
    .with_aggregate_type(record.aggregate_type.clone())
    .with_schema_version(record.schema_version.clone())
    .with_correlation_id(record.correlation_id.clone())
    .with_causation_id(record.causation_id.clone())
    .with_trace_id(record.trace_id.clone())
    .with_user_id(record.user_id.clone())
    .with_metadata(metadata))
}

/// Build the complete bus message for a stored record
pub fn to_bus_message(record: &OutboxRecord, topic_prefix: &str) -> Result<BusMessage, EnvelopeError> {
    let body = to_cloud_event(record)?.to_bytes()?;

    Ok(BusMessage::new(record.event_type.topic(topic_prefix), body)
        .with_header(MSG_ID_HEADER, record.event_id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, NewOutboxEvent};
    use chrono::Utc;
    use event_bus::validate_cloud_event;

    fn record(payload: &str, metadata: Option<&str>) -> OutboxRecord {
        let event = NewOutboxEvent::builder(EventType::OrderCreated, "order-42")
            .event_id("evt-1")
            .raw_payload(payload)
            .raw_metadata(metadata.map(str::to_string))
            .correlation_id(Some("req-7".to_string()))
            .trace_id(Some("trace-9".to_string()))
            .build()
            .unwrap();
        OutboxRecord::from_new(1, &event, Utc::now())
    }

    #[test]
    fn message_is_a_valid_cloud_event_on_the_type_topic() {
        let msg = to_bus_message(&record(r#"{"order_number":"ORD-001"}"#, None), "bss.events").unwrap();

        assert_eq!(msg.subject, "bss.events.order.created");
        assert_eq!(msg.header(MSG_ID_HEADER), Some("evt-1"));

        let body: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        validate_cloud_event(&body).unwrap();
        assert_eq!(body["id"], "evt-1");
        assert_eq!(body["type"], "OrderCreated");
        assert_eq!(body["subject"], "order-42");
        assert_eq!(body["datacontenttype"], "application/json");
        assert_eq!(body["data"]["order_number"], "ORD-001");
        assert_eq!(body["correlationid"], "req-7");
        assert_eq!(body["traceid"], "trace-9");
        assert!(body.get("causationid").is_none());
    }

    #[test]
    fn metadata_is_carried_as_a_json_string_extension() {
        let msg = to_bus_message(
            &record("{}", Some(r#"{ "flags": { "beta": true } }"#)),
            DEFAULT_TOPIC_PREFIX,
        )
        .unwrap();

        let body: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        validate_cloud_event(&body).unwrap();

        let text = body["metadata"].as_str().expect("metadata is a string");
        let decoded: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(decoded, serde_json::json!({"flags": {"beta": true}}));
    }

    #[test]
    fn malformed_payload_or_metadata_is_a_serialization_error() {
        assert!(matches!(
            to_bus_message(&record("{not json", None), DEFAULT_TOPIC_PREFIX),
            Err(EnvelopeError::Serialization(_))
        ));
        assert!(matches!(
            to_cloud_event(&record("{}", Some("<xml/>"))),
            Err(EnvelopeError::Serialization(_))
        ));
    }
}
