use serde::{Deserialize, Serialize};

use super::{build_event, require, require_non_negative, EventContext};
use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub order_number: String,
    pub customer_id: String,
    pub status: String,
    pub total_amount_cents: i64,
    pub currency: String,
}

impl OrderSnapshot {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require("order_id", &self.order_id)?;
        require("order_number", &self.order_number)?;
        require("customer_id", &self.customer_id)?;
        require("currency", &self.currency)?;
        require_non_negative("total_amount_cents", self.total_amount_cents)
    }
}

#[derive(Serialize)]
struct StatusChange<'a> {
    #[serde(flatten)]
    order: &'a OrderSnapshot,
    previous_status: &'a str,
}

#[derive(Serialize)]
struct Cancellation<'a> {
    #[serde(flatten)]
    order: &'a OrderSnapshot,
    reason: Option<&'a str>,
}

fn order_event(
    event_type: EventType,
    order: &OrderSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    order.validate()?;
    build_event(event_type, &order.order_id, order, ctx)
}

pub fn order_created(order: &OrderSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    order_event(EventType::OrderCreated, order, ctx)
}

pub fn order_updated(order: &OrderSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    order_event(EventType::OrderUpdated, order, ctx)
}

pub fn order_completed(order: &OrderSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    order_event(EventType::OrderCompleted, order, ctx)
}

pub fn order_status_changed(
    order: &OrderSnapshot,
    previous_status: &str,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    order.validate()?;
    require("previous_status", previous_status)?;

    let payload = StatusChange {
        order,
        previous_status,
    };
    build_event(EventType::OrderStatusChanged, &order.order_id, &payload, ctx)
}

pub fn order_cancelled(
    order: &OrderSnapshot,
    reason: Option<&str>,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    order.validate()?;
    build_event(
        EventType::OrderCancelled,
        &order.order_id,
        &Cancellation { order, reason },
        ctx,
    )
}
