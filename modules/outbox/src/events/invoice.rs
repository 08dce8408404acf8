use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{build_event, require, require_non_negative, EventContext};
use crate::error::EnvelopeError;
use crate::models::{EventType, NewOutboxEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub invoice_id: String,
    pub invoice_number: String,
    pub customer_id: String,
    pub total_amount_cents: i64,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: String,
}

impl InvoiceSnapshot {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require("invoice_id", &self.invoice_id)?;
        require("invoice_number", &self.invoice_number)?;
        require("customer_id", &self.customer_id)?;
        require("currency", &self.currency)?;
        require_non_negative("total_amount_cents", self.total_amount_cents)
    }
}

#[derive(Serialize)]
struct Paid<'a> {
    #[serde(flatten)]
    invoice: &'a InvoiceSnapshot,
    paid_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct Overdue<'a> {
    #[serde(flatten)]
    invoice: &'a InvoiceSnapshot,
    days_overdue: i64,
}

fn invoice_event(
    event_type: EventType,
    invoice: &InvoiceSnapshot,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice.validate()?;
    build_event(event_type, &invoice.invoice_id, invoice, ctx)
}

pub fn invoice_created(invoice: &InvoiceSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice_event(EventType::InvoiceCreated, invoice, ctx)
}

pub fn invoice_sent(invoice: &InvoiceSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice_event(EventType::InvoiceSent, invoice, ctx)
}

pub fn invoice_cancelled(invoice: &InvoiceSnapshot, ctx: &EventContext) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice_event(EventType::InvoiceCancelled, invoice, ctx)
}

pub fn invoice_paid(
    invoice: &InvoiceSnapshot,
    paid_at: DateTime<Utc>,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice.validate()?;
    build_event(EventType::InvoicePaid, &invoice.invoice_id, &Paid { invoice, paid_at }, ctx)
}

/// Overdue as of `today`; rejected if the invoice is not yet past due
pub fn invoice_overdue(
    invoice: &InvoiceSnapshot,
    today: NaiveDate,
    ctx: &EventContext,
) -> Result<NewOutboxEvent, EnvelopeError> {
    invoice.validate()?;

    let days_overdue = (today - invoice.due_date).num_days();
    if days_overdue <= 0 {
        return Err(EnvelopeError::InvalidField {
            field: "due_date",
            reason: format!("{} is not before {}", invoice.due_date, today),
        });
    }

    build_event(
        EventType::InvoiceOverdue,
        &invoice.invoice_id,
        &Overdue {
            invoice,
            days_overdue,
        },
        ctx,
    )
}
