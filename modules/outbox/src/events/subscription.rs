//! Subscription lifecycle events

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{build_event, require, EventContext};
use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub subscription_number: String,
    pub customer_id: String,
    pub product_id: String,
    pub status: String,
    pub billing_period: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl SubscriptionSnapshot {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require("subscription_id", &self.subscription_id)?;
        require("subscription_number", &self.subscription_number)?;
        require("customer_id", &self.customer_id)?;
        require("product_id", &self.product_id)?;
        require("billing_period", &self.billing_period)
    }
}

#[derive(Serialize)]
struct Renewal<'a> {
    #[serde(flatten)]
    subscription: &'a SubscriptionSnapshot,
    renewed_until: NaiveDate,
}

#[derive(Serialize)]
struct WithReason<'a> {
    #[serde(flatten)]
    subscription: &'a SubscriptionSnapshot,
    reason: Option<&'a str>,
}

fn subscription_event<T: Serialize>(
    event_type: EventType,
    subscription: &SubscriptionSnapshot,
    payload: &T,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    subscription.validate()?;
    build_event(event_type, &subscription.subscription_id, payload, ctx)
}

pub fn subscription_created(
    subscription: &SubscriptionSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    subscription_event(EventType::SubscriptionCreated, subscription, subscription, ctx)
}

pub fn subscription_activated(
    subscription: &SubscriptionSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    subscription_event(EventType::SubscriptionActivated, subscription, subscription, ctx)
}

/// `renewed_until` must fall after the subscription's start date
pub fn subscription_renewed(
    subscription: &SubscriptionSnapshot,
    renewed_until: NaiveDate,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    if renewed_until <= subscription.start_date {
        return Err(EnvelopeError::InvalidField {
            field: "renewed_until",
            reason: format!("{} is not after start date {}", renewed_until, subscription.start_date),
        });
    }

    let payload = Renewal {
        subscription,
        renewed_until,
    };
    subscription_event(EventType::SubscriptionRenewed, subscription, &payload, ctx)
}

pub fn subscription_suspended(
    subscription: &SubscriptionSnapshot,
    reason: Option<&str>,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    let payload = WithReason { subscription, reason };
    subscription_event(EventType::SubscriptionSuspended, subscription, &payload, ctx)
}

pub fn subscription_cancelled(
    subscription: &SubscriptionSnapshot,
    reason: Option<&str>,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    let payload = WithReason { subscription, reason };
    subscription_event(EventType::SubscriptionCancelled, subscription, &payload, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: "sub-1".to_string(),
            subscription_number: "SUB-001".to_string(),
            customer_id: "cust-1".to_string(),
            product_id: "fiber-1g".to_string(),
            status: "ACTIVE".to_string(),
            billing_period: "MONTHLY".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
        }
    }

    #[test]
    fn renewal_carries_new_end() {
        let until = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let event = subscription_renewed(&subscription(), until, &EventContext::new()).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();

        assert_eq!(event.event_type.topic_suffix(), "subscription.renewed");
        assert_eq!(payload["renewed_until"], "2026-02-01");
        assert_eq!(payload["start_date"], "2026-01-01");
    }

    #[test]
    fn renewal_before_start_is_rejected() {
        let until = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert!(matches!(
            subscription_renewed(&subscription(), until, &EventContext::new()),
            Err(EnvelopeError::InvalidField { field: "renewed_until", .. })
        ));
    }

    #[test]
    fn cancellation_reason_is_optional() {
        let event = subscription_cancelled(&subscription(), None, &EventContext::new()).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();
        assert!(payload["reason"].is_null());

        let mut blank = subscription();
        blank.product_id.clear();
        assert_eq!(
            subscription_suspended(&blank, Some("non-payment"), &EventContext::new()),
            Err(EnvelopeError::MissingField("product_id"))
        );
    }

    #[test]
    fn created_and_activated_use_their_own_types() {
        let created = subscription_created(&subscription(), &EventContext::new()).unwrap();
        let activated = subscription_activated(&subscription(), &EventContext::new()).unwrap();
        assert_eq!(created.event_type, EventType::SubscriptionCreated);
        assert_eq!(activated.event_type, EventType::SubscriptionActivated);
    }
}
