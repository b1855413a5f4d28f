//! In-process [`MessageChannel`] that records every publish and settlement.
//!
//! Used by tests and for running the pipeline without a broker.

use crate::channel::{Delivery, DeliveryStream, MessageChannel, Settlement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A message accepted by [`MemoryChannel::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
}

#[derive(Debug)]
enum Queued {
    Message(u64, Bytes),
    ReceiveError(String),
}

#[derive(Debug, Default)]
struct Ledger {
    queues: HashMap<String, VecDeque<Queued>>,
    published: Vec<PublishedMessage>,
    settlements: Vec<(u64, Settlement)>,
    /// Tags whose ack or reject fails.
    failing_settlements: HashSet<u64>,
    next_tag: u64,
}

/// Shared, cloneable in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    ledger: Arc<Mutex<Ledger>>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload and return its delivery tag.
    pub fn enqueue(&self, queue: &str, payload: impl Into<Bytes>) -> u64 {
        let mut ledger = self.lock();
        ledger.next_tag += 1;
        let tag = ledger.next_tag;
        ledger
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Queued::Message(tag, payload.into()));
        tag
    }

    /// Queue a receive error; the delivery stream yields it in order.
    pub fn enqueue_receive_error(&self, queue: &str, message: impl Into<String>) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Queued::ReceiveError(message.into()));
    }

    /// Make the ack or reject of delivery `tag` fail. Nothing is recorded for it.
    pub fn fail_settlement(&self, tag: u64) {
        self.lock().failing_settlements.insert(tag);
    }

    /// Make every following publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Settlements in the order they were made, keyed by delivery tag.
    pub fn settlements(&self) -> Vec<(u64, Settlement)> {
        self.lock().settlements.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        lock(&self.ledger)
    }
}

fn lock(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delivery handed out by [`MemoryChannel`].
#[derive(Debug)]
pub struct MemoryDelivery {
    tag: u64,
    payload: Bytes,
    ledger: Arc<Mutex<Ledger>>,
}

impl MemoryDelivery {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    fn record(&self, settlement: Settlement) -> Result<()> {
        let mut ledger = lock(&self.ledger);
        if ledger.failing_settlements.contains(&self.tag) {
            return Err(Error::Ack(format!(
                "delivery {} could not be settled as {:?}",
                self.tag, settlement
            )));
        }
        ledger.settlements.push((self.tag, settlement));
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<()> {
        self.record(Settlement::Ack)
    }

    async fn reject(&self) -> Result<()> {
        self.record(Settlement::Reject)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    type Delivery = MemoryDelivery;

    /// Drains what is queued right now; the stream ends once it is delivered.
    async fn deliveries(&self, queue: &str) -> Result<DeliveryStream<MemoryDelivery>> {
        let pending: Vec<Queued> = self
            .lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();

        let ledger = self.ledger.clone();
        let deliveries = pending.into_iter().map(move |queued| match queued {
            Queued::Message(tag, payload) => Ok(MemoryDelivery {
                tag,
                payload,
                ledger: ledger.clone(),
            }),
            Queued::ReceiveError(message) => Err(Error::Receive(message)),
        });

        Ok(futures::stream::iter(deliveries).boxed())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Publish(format!(
                "no route for '{}' on exchange '{}'",
                routing_key, exchange
            )));
        }

        self.lock().published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliveries_drain_queue() {
        let channel = MemoryChannel::new();
        channel.enqueue("q", &b"one"[..]);
        channel.enqueue("q", &b"two"[..]);

        let tags: Vec<u64> = channel
            .deliveries("q")
            .await
            .unwrap()
            .map(|d| d.unwrap().tag())
            .collect()
            .await;
        assert_eq!(tags, vec![1, 2]);

        let again = channel.deliveries("q").await.unwrap().count().await;
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let channel = MemoryChannel::new();
        channel.fail_publishes(true);

        let err = channel
            .publish("ex", "key", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_receive_error_yielded_in_queue_order() {
        let channel = MemoryChannel::new();
        channel.enqueue_receive_error("q", "connection reset");
        let tag = channel.enqueue("q", &b"one"[..]);

        let items: Vec<Result<MemoryDelivery>> =
            channel.deliveries("q").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(Error::Receive(_))));
        assert_eq!(items[1].as_ref().unwrap().tag(), tag);
    }

    #[tokio::test]
    async fn test_failing_settlement_is_not_recorded() {
        let channel = MemoryChannel::new();
        let tag = channel.enqueue("q", &b"one"[..]);
        channel.fail_settlement(tag);

        let mut deliveries = channel.deliveries("q").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();

        assert!(matches!(delivery.ack().await, Err(Error::Ack(_))));
        assert!(matches!(delivery.reject().await, Err(Error::Ack(_))));
        assert!(channel.settlements().is_empty());
    }
}
