//! Customer lifecycle events

use serde::{Deserialize, Serialize};

use super::{build_event, require, EventContext};
use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

/// Customer state as of the business change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: String,
}

impl CustomerSnapshot {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require("customer_id", &self.customer_id)?;
        require("email", &self.email)?;
        require("status", &self.status)
    }
}

#[derive(Serialize)]
struct StatusChange<'a> {
    #[serde(flatten)]
    customer: &'a CustomerSnapshot,
    previous_status: &'a str,
}

#[derive(Serialize)]
struct Deleted<'a> {
    customer_id: &'a str,
}

pub fn customer_created(
    customer: &CustomerSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    customer.validate()?;
    build_event(EventType::CustomerCreated, &customer.customer_id, customer, ctx)
}

pub fn customer_updated(
    customer: &CustomerSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    customer.validate()?;
    build_event(EventType::CustomerUpdated, &customer.customer_id, customer, ctx)
}

pub fn customer_deleted(customer_id: &str, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    require("customer_id", customer_id)?;
    build_event(EventType::CustomerDeleted, customer_id, &Deleted { customer_id }, ctx)
}

pub fn customer_status_changed(
    customer: &CustomerSnapshot,
    previous_status: &str,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    customer.validate()?;
    require("previous_status", previous_status)?;

    let payload = StatusChange {
        customer,
        previous_status,
    };
    build_event(EventType::CustomerStatusChanged, &customer.customer_id, &payload, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> CustomerSnapshot {
        CustomerSnapshot {
            customer_id: "cust-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            status: "ACTIVE".to_string(),
        }
    }

    #[test]
    fn created_carries_the_snapshot() {
        let event = customer_created(&ada(), &EventContext::new().with_event_id("e1")).unwrap();

        assert_eq!(event.event_type, EventType::CustomerCreated);
        assert_eq!(event.aggregate_id, "cust-1");
        let payload: CustomerSnapshot = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(payload, ada());
    }

    #[test]
    fn status_change_records_previous_status() {
        let mut customer = ada();
        customer.status = "SUSPENDED".to_string();

        let event = customer_status_changed(&customer, "ACTIVE", &EventContext::new()).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();

        assert_eq!(payload["status"], "SUSPENDED");
        assert_eq!(payload["previous_status"], "ACTIVE");
        assert_eq!(payload["customer_id"], "cust-1");
    }

    #[test]
    fn missing_email_rejects_construction() {
        let mut customer = ada();
        customer.email = String::new();

        assert_eq!(
            customer_updated(&customer, &EventContext::new()),
            Err(EnvelopeError::MissingField("email"))
        );
    }

    #[test]
    fn deleted_needs_only_the_id() {
        let event = customer_deleted("cust-9", &EventContext::new()).unwrap();
        assert_eq!(event.payload, r#"{"customer_id":"cust-9"}"#);
        assert!(customer_deleted("", &EventContext::new()).is_err());
    }
}
