//! # EventBus Abstraction
//!
//! The broker-facing side of the outbox pipeline. The outbox publisher only
//! ever sees `Arc<dyn EventBus>`; which broker sits behind it is a
//! deployment decision.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation on a NATS connection
//! - **InMemoryBus**: Dev/test implementation on a broadcast channel, with
//!   fault injection so delivery failures can be simulated
//!
//! ## Wire format
//!
//! Every outbox record is shipped as a [`CloudEvent`] (CloudEvents 1.0,
//! structured JSON mode) so consumers can decode any event type without
//! per-type parsing logic.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, NatsBus, InMemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: NATS
//! let nats_client = async_nats::connect("nats://localhost:4222").await?;
//! let bus: Arc<dyn EventBus> = Arc::new(NatsBus::new(nats_client));
//!
//! // Dev/Test: In-Memory
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! bus.publish("bss.events.order.created", b"{}".to_vec()).await?;
//!
//! let mut stream = bus.subscribe("bss.events.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("Received: {} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

mod cloud_event;
mod inmemory_bus;
mod nats_bus;

pub use cloud_event::{validate_cloud_event, CloudEvent, CLOUD_EVENTS_SPEC_VERSION, JSON_CONTENT_TYPE};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying the idempotency key of a published message.
///
/// A JetStream stream capturing the subject de-duplicates on it within its
/// duplicate window. Core NATS subscribers and other buses receive it as a
/// plain header and must de-duplicate on it themselves.
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// A message travelling over the event bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<HashMap<String, String>>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a single header, keeping any already present
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add a reply-to subject
    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(key))
            .map(String::as_str)
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
///
/// A successful `publish` means the broker accepted the message. Callers that
/// need bounded latency must wrap the call in their own timeout; the trait
/// makes no promise about how long a hung connection takes to fail.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// # Arguments
    /// * `subject` - The subject/topic to publish to (e.g., "bss.events.order.created")
    /// * `payload` - The message payload as raw bytes
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Publish a message carrying headers
    ///
    /// The default implementation drops the headers and falls back to
    /// [`EventBus::publish`]; buses with native header support override it.
    async fn publish_message(&self, message: BusMessage) -> BusResult<()> {
        self.publish(&message.subject, message.payload).await
    }

    /// Subscribe to messages matching a subject pattern
    ///
    /// # Arguments
    /// * `subject` - The subject pattern to subscribe to (supports wildcards: `*`, `>`)
    ///   - `*` matches a single token (e.g., `bss.*.created`)
    ///   - `>` matches one or more tokens (e.g., `bss.events.>`)
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_header_accumulates() {
        let msg = BusMessage::new("a.b".to_string(), vec![])
            .with_header(MSG_ID_HEADER, "evt-1")
            .with_header("ce-type", "OrderCreated");

        assert_eq!(msg.header(MSG_ID_HEADER), Some("evt-1"));
        assert_eq!(msg.header("ce-type"), Some("OrderCreated"));
        assert_eq!(msg.header("missing"), None);
    }
}
