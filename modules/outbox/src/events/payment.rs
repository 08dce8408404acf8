//! Payment events
//!
//! Refunds carry their own amount, which may be less than the original
//! payment; it must be positive and never exceed it.

use serde::{Deserialize, Serialize};

use super::{build_event, require, require_non_negative, EventContext};
use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub payment_id: String,
    pub payment_number: String,
    pub customer_id: String,
    pub invoice_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub method: String,
    pub status: String,
}

impl PaymentSnapshot {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require("payment_id", &self.payment_id)?;
        require("payment_number", &self.payment_number)?;
        require("customer_id", &self.customer_id)?;
        require("currency", &self.currency)?;
        require_non_negative("amount_cents", self.amount_cents)
    }
}

#[derive(Serialize)]
struct Failure<'a> {
    #[serde(flatten)]
    payment: &'a PaymentSnapshot,
    failure_reason: &'a str,
}

#[derive(Serialize)]
struct Refund<'a> {
    #[serde(flatten)]
    payment: &'a PaymentSnapshot,
    refund_amount_cents: i64,
}

pub fn payment_processed(
    payment: &PaymentSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    payment.validate()?;
    build_event(EventType::PaymentProcessed, &payment.payment_id, payment, ctx)
}

pub fn payment_completed(
    payment: &PaymentSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    payment.validate()?;
    build_event(EventType::PaymentCompleted, &payment.payment_id, payment, ctx)
}

pub fn payment_failed(
    payment: &PaymentSnapshot,
    failure_reason: &str,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    payment.validate()?;
    require("failure_reason", failure_reason)?;

    let payload = Failure {
        payment,
        failure_reason,
    };
    build_event(EventType::PaymentFailed, &payment.payment_id, &payload, ctx)
}

pub fn payment_refunded(
    payment: &PaymentSnapshot,
    refund_amount_cents: i64,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    payment.validate()?;
    if refund_amount_cents <= 0 || refund_amount_cents > payment.amount_cents {
        return Err(EnvelopeError::InvalidField {
            field: "refund_amount_cents",
            reason: format!(
                "must be between 1 and {}, got {}",
                payment.amount_cents, refund_amount_cents
            ),
        });
    }

    let payload = Refund {
        payment,
        refund_amount_cents,
    };
    build_event(EventType::PaymentRefunded, &payment.payment_id, &payload, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> PaymentSnapshot {
        PaymentSnapshot {
            payment_id: "pay-1".to_string(),
            payment_number: "PAY-001".to_string(),
            customer_id: "cust-1".to_string(),
            invoice_id: Some("inv-1".to_string()),
            amount_cents: 10_000,
            currency: "EUR".to_string(),
            method: "CARD".to_string(),
            status: "COMPLETED".to_string(),
        }
    }

    #[test]
    fn refund_amount_is_bounded_by_payment() {
        let event = payment_refunded(&payment(), 2_500, &EventContext::new()).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();

        assert_eq!(event.event_type, EventType::PaymentRefunded);
        assert_eq!(payload["refund_amount_cents"], 2_500);
        assert_eq!(payload["amount_cents"], 10_000);

        assert!(payment_refunded(&payment(), 0, &EventContext::new()).is_err());
        assert!(payment_refunded(&payment(), 10_001, &EventContext::new()).is_err());
    }

    #[test]
    fn failure_requires_a_reason() {
        let event = payment_failed(&payment(), "card declined", &EventContext::new()).unwrap();
        assert!(event.payload.contains("card declined"));

        assert_eq!(
            payment_failed(&payment(), "", &EventContext::new()),
            Err(EnvelopeError::MissingField("failure_reason"))
        );
    }

    #[test]
    fn processed_and_completed_share_the_aggregate() {
        let processed = payment_processed(&payment(), &EventContext::new()).unwrap();
        let completed = payment_completed(&payment(), &EventContext::new()).unwrap();

        assert_eq!(processed.aggregate_id, completed.aggregate_id);
        assert_ne!(processed.event_id, completed.event_id);
    }
}
