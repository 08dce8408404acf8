//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// Messages are broadcast to all subscribers via a Tokio broadcast channel and
/// every accepted message is also kept in a publish log, so tests can assert
/// on what was delivered without racing a subscriber.
///
/// Delivery failures can be injected:
/// - [`InMemoryBus::fail_next`] rejects the next `n` publishes
/// - [`InMemoryBus::set_unavailable`] rejects every publish until cleared
/// - [`InMemoryBus::set_publish_delay`] makes publishes hang for a while
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// let mut stream = bus.subscribe("bss.events.>").await?;
///
/// bus.publish("bss.events.order.created", b"hello".to_vec()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "bss.events.order.created");
/// assert_eq!(bus.published_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    published: Arc<Mutex<Vec<BusMessage>>>,
    failures_remaining: Arc<AtomicU32>,
    unavailable: Arc<AtomicBool>,
    publish_delay: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus with a buffer of 1000 messages
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new in-memory event bus with a custom buffer size
    ///
    /// # Arguments
    /// * `buffer_size` - The maximum number of messages to buffer before slow
    ///   subscribers start lagging
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            published: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: Arc::new(AtomicU32::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
            publish_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject the next `count` publish calls with a connection error
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Reject every publish call while `unavailable` is true
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every publish call by `delay` before it is accepted
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.publish_delay.lock() {
            *guard = delay;
        }
    }

    /// Snapshot of every message the bus accepted, in publish order
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Number of messages the bus accepted
    pub fn published_count(&self) -> usize {
        self.published.lock().map(|log| log.len()).unwrap_or(0)
    }

    fn take_injected_failure(&self) -> Option<BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Some(BusError::ConnectionError("bus unavailable".to_string()));
        }

        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        consumed.then(|| BusError::PublishError("injected publish failure".to_string()))
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.publish_message(BusMessage::new(subject.to_string(), payload))
            .await
    }

    async fn publish_message(&self, message: BusMessage) -> BusResult<()> {
        let delay = self.publish_delay.lock().ok().and_then(|guard| *guard);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        self.published
            .lock()
            .map_err(|e| BusError::InternalError(e.to_string()))?
            .push(message.clone());

        // No receivers is fine: the log above already recorded the message
        let _ = self.sender.send(message);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(InMemoryBus::matches_pattern("bss.events.order.created", "bss.events.order.created"));
        assert!(InMemoryBus::matches_pattern("bss.events.order.created", "bss.*.order.created"));
        assert!(!InMemoryBus::matches_pattern("bss.events.order.created", "bss.*.created"));
        assert!(InMemoryBus::matches_pattern("bss.events.order.created", "bss.events.>"));
        assert!(!InMemoryBus::matches_pattern("bss.events.order.created", "billing.>"));
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("bss.events.>").await.unwrap();

        bus.publish("bss.events.invoice.paid", b"paid".to_vec())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "bss.events.invoice.paid");
        assert_eq!(msg.payload, b"paid");
    }

    #[tokio::test]
    async fn test_fail_next_rejects_then_recovers() {
        let bus = InMemoryBus::new();
        bus.fail_next(2);

        assert!(bus.publish("a.b", vec![1]).await.is_err());
        assert!(bus.publish("a.b", vec![2]).await.is_err());
        assert!(bus.publish("a.b", vec![3]).await.is_ok());

        let log = bus.published();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].payload, vec![3]);
    }

    #[tokio::test]
    async fn test_unavailable_rejects_until_cleared() {
        let bus = InMemoryBus::new();
        bus.set_unavailable(true);

        let err = bus.publish("a.b", vec![]).await.unwrap_err();
        assert!(matches!(err, BusError::ConnectionError(_)));
        assert_eq!(bus.published_count(), 0);

        bus.set_unavailable(false);
        bus.publish("a.b", vec![]).await.unwrap();
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_headers_are_kept() {
        let bus = InMemoryBus::new();
        let msg = BusMessage::new("a.b".to_string(), vec![]).with_header(crate::MSG_ID_HEADER, "evt-9");

        bus.publish_message(msg).await.unwrap();

        assert_eq!(bus.published()[0].header(crate::MSG_ID_HEADER), Some("evt-9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_delay_holds_the_call() {
        let bus = InMemoryBus::new();
        bus.set_publish_delay(Some(Duration::from_secs(30)));

        let result = tokio::time::timeout(Duration::from_secs(1), bus.publish("a.b", vec![])).await;

        assert!(result.is_err(), "publish should still be pending");
        assert_eq!(bus.published_count(), 0);
    }
}
