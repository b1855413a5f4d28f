//! Broker-agnostic message channel and the consume loop that owns the
//! ack discipline.
//!
//! Every delivery ends in exactly one settlement: [`Settlement::Ack`] when the
//! handler succeeds, [`Settlement::Reject`] (no redelivery) when the payload
//! does not decode or the handler fails. A message that cannot be processed
//! is dropped once instead of looping through the queue.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::counter;
use std::fmt::Display;
use std::future::{self, Future};
use tracing::{debug, error, info, warn};

/// Content type of every payload on the channel.
pub const CONTENT_TYPE: &str = "application/protobuf";

/// Final outcome reported to the broker for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative ack, never redelivered.
    Reject,
}

/// A message handed out by the broker that must be settled exactly once.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body.
    fn payload(&self) -> &[u8];

    /// Acknowledge successful processing.
    async fn ack(&self) -> Result<()>;

    /// Reject the message without redelivery.
    async fn reject(&self) -> Result<()>;
}

/// Live stream of deliveries for one queue.
pub type DeliveryStream<D> = BoxStream<'static, Result<D>>;

/// Publish/subscribe surface the pipeline needs from a broker.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    type Delivery: Delivery + 'static;

    /// Open the delivery stream of a queue declared beforehand.
    async fn deliveries(&self, queue: &str) -> Result<DeliveryStream<Self::Delivery>>;

    /// Publish one payload. Failures are returned, never retried.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()>;
}

/// Consume `queue` until the delivery stream ends.
///
/// See [`consume_until`].
pub async fn consume<C, T, H, Fut, E>(channel: &C, queue: &str, handler: H) -> Result<()>
where
    C: MessageChannel + ?Sized,
    T: prost::Message + Default,
    H: FnMut(T) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    consume_until(channel, queue, handler, future::pending::<()>()).await
}

/// Consume `queue` until the delivery stream ends or `stop` resolves.
///
/// Deliveries are handled one at a time in broker order. Each payload is
/// decoded as `T`; decode failures are rejected and never reach `handler`.
/// `stop` is only observed between deliveries.
pub async fn consume_until<C, T, H, Fut, E, S>(
    channel: &C,
    queue: &str,
    mut handler: H,
    stop: S,
) -> Result<()>
where
    C: MessageChannel + ?Sized,
    T: prost::Message + Default,
    H: FnMut(T) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
    S: Future<Output = ()>,
{
    let deliveries = channel.deliveries(queue).await?.take_until(stop);
    tokio::pin!(deliveries);
    info!("Consuming from queue '{}'", queue);

    while let Some(next) = deliveries.next().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("[{}] Failed to receive delivery: {}", queue, e);
                continue;
            }
        };

        counter!("normalizer_messages_received_total").increment(1);
        let settlement = process_delivery(&delivery, &mut handler).await;
        settle(&delivery, settlement).await;
    }

    info!("Stopped consuming from queue '{}'", queue);
    Ok(())
}

/// Decode a delivery and run the handler on it, returning the settlement.
pub async fn process_delivery<D, T, H, Fut, E>(delivery: &D, handler: &mut H) -> Settlement
where
    D: Delivery + ?Sized,
    T: prost::Message + Default,
    H: FnMut(T) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let record = match T::decode(delivery.payload()) {
        Ok(record) => record,
        Err(e) => {
            error!("Could not decode delivery ({} bytes): {}", delivery.payload().len(), e);
            counter!("normalizer_messages_rejected_total", "stage" => "decode").increment(1);
            return Settlement::Reject;
        }
    };

    match handler(record).await {
        Ok(()) => Settlement::Ack,
        Err(e) => {
            error!("Could not process delivery: {}", e);
            Settlement::Reject
        }
    }
}

/// Report a settlement to the broker. Failures are logged, not propagated.
pub async fn settle<D: Delivery + ?Sized>(delivery: &D, settlement: Settlement) {
    let result = match settlement {
        Settlement::Ack => delivery.ack().await,
        Settlement::Reject => delivery.reject().await,
    };

    match result {
        Ok(()) => debug!("Delivery settled: {:?}", settlement),
        Err(e) => error!("Failed to settle delivery as {:?}: {}", settlement, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChannel;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(string, tag = "1")]
        body: String,
    }

    fn ping(body: &str) -> Vec<u8> {
        prost::Message::encode_to_vec(&Ping {
            body: body.to_string(),
        })
    }

    #[tokio::test]
    async fn test_successful_handler_acks() {
        let channel = MemoryChannel::new();
        let tag = channel.enqueue("in", ping("hello"));

        let mut seen = Vec::new();
        consume(&channel, "in", |msg: Ping| {
            seen.push(msg.body);
            async { Ok::<(), String>(()) }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["hello".to_string()]);
        assert_eq!(channel.settlements(), vec![(tag, Settlement::Ack)]);
    }

    #[tokio::test]
    async fn test_failing_handler_rejects() {
        let channel = MemoryChannel::new();
        let tag = channel.enqueue("in", ping("hello"));

        consume(&channel, "in", |_: Ping| async { Err("boom") })
            .await
            .unwrap();

        assert_eq!(channel.settlements(), vec![(tag, Settlement::Reject)]);
    }

    #[tokio::test]
    async fn test_undecodable_payload_never_reaches_handler() {
        let channel = MemoryChannel::new();
        // Field 1 declared as length-delimited with a length past the end
        let tag = channel.enqueue("in", vec![0x0a, 0xff, 0x01]);

        let mut calls = 0;
        consume(&channel, "in", |_: Ping| {
            calls += 1;
            async { Ok::<(), String>(()) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(channel.settlements(), vec![(tag, Settlement::Reject)]);
    }

    #[tokio::test]
    async fn test_deliveries_processed_in_order() {
        let channel = MemoryChannel::new();
        let first = channel.enqueue("in", ping("a"));
        let bad = channel.enqueue("in", b"\xff\xff".to_vec());
        let last = channel.enqueue("in", ping("c"));

        let mut seen = Vec::new();
        consume(&channel, "in", |msg: Ping| {
            seen.push(msg.body);
            async { Ok::<(), String>(()) }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(
            channel.settlements(),
            vec![
                (first, Settlement::Ack),
                (bad, Settlement::Reject),
                (last, Settlement::Ack),
            ]
        );
    }

    #[tokio::test]
    async fn test_receive_error_skipped_and_loop_continues() {
        let channel = MemoryChannel::new();
        channel.enqueue_receive_error("in", "connection reset");
        let tag = channel.enqueue("in", ping("after"));

        let mut seen = Vec::new();
        consume(&channel, "in", |msg: Ping| {
            seen.push(msg.body);
            async { Ok::<(), String>(()) }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["after".to_string()]);
        assert_eq!(channel.settlements(), vec![(tag, Settlement::Ack)]);
    }

    #[tokio::test]
    async fn test_failed_settlement_does_not_stop_consumption() {
        let channel = MemoryChannel::new();
        let first = channel.enqueue("in", ping("a"));
        let bad = channel.enqueue("in", b"\xff\xff".to_vec());
        let last = channel.enqueue("in", ping("c"));
        channel.fail_settlement(first);
        channel.fail_settlement(bad);

        let mut calls = 0;
        consume(&channel, "in", |_: Ping| {
            calls += 1;
            async { Ok::<(), String>(()) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(channel.settlements(), vec![(last, Settlement::Ack)]);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_consumption() {
        let channel = MemoryChannel::new();
        channel.enqueue("in", ping("a"));

        consume_until(
            &channel,
            "in",
            |_: Ping| async { Ok::<(), String>(()) },
            future::ready(()),
        )
        .await
        .unwrap();

        assert!(channel.settlements().is_empty());
    }
}
