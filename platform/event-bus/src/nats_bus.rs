//! NATS-based implementation of the EventBus trait

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// EventBus implementation on a NATS connection
///
/// Publishes are followed by a flush so that a dead connection surfaces as an
/// error on the publish call instead of silently buffering in the client.
///
/// Messages go out as core NATS publishes. Server-side de-duplication on
/// [`crate::MSG_ID_HEADER`] only happens when a JetStream stream captures the
/// subject; otherwise the header is delivered for consumers to act on.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.publish("bss.events.order.created", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        self.flush().await
    }

    async fn publish_message(&self, message: BusMessage) -> BusResult<()> {
        let Some(headers) = message.headers else {
            return self.publish(&message.subject, message.payload).await;
        };

        let mut nats_headers = HeaderMap::new();
        for (key, value) in headers.iter() {
            nats_headers.insert(key.as_str(), value.as_str());
        }

        self.client
            .publish_with_headers(message.subject, nats_headers, message.payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        self.flush().await
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber.map(|nats_msg| {
            let mut msg = BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec());

            if let Some(reply) = nats_msg.reply {
                msg = msg.with_reply_to(reply.to_string());
            }

            if let Some(nats_headers) = nats_msg.headers {
                let mut headers = HashMap::new();
                for (key, values) in nats_headers.iter() {
                    if let Some(value) = values.first() {
                        headers.insert(key.to_string(), value.to_string());
                    }
                }
                if !headers.is_empty() {
                    msg = msg.with_headers(headers);
                }
            }

            msg
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MSG_ID_HEADER;

    // Requires a running NATS server: docker run -p 4222:4222 nats:2.10-alpine
    #[tokio::test]
    #[ignore]
    async fn test_nats_bus_keeps_message_id_header() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);
        let mut stream = bus.subscribe("test.outbox.>").await.unwrap();

        let msg = BusMessage::new("test.outbox.order.created".to_string(), b"{}".to_vec())
            .with_header(MSG_ID_HEADER, "evt-1");
        bus.publish_message(msg).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(received.subject, "test.outbox.order.created");
        assert_eq!(received.header(MSG_ID_HEADER), Some("evt-1"));
    }
}
