//! Message channel for the item normalizer.
//!
//! Wraps NATS JetStream behind the [`MessageChannel`] trait and owns the ack
//! discipline: every delivery is decoded, handed to a handler, and then acked
//! or rejected without redelivery.
//!
//! # Usage
//!
//! ```ignore
//! use nats_client::{consume, ConnectionConfig, NatsChannel};
//!
//! let mut channel = NatsChannel::new(ConnectionConfig::new("nats://localhost:4222"));
//! channel.connect().await?;
//! channel.setup_consumer("items", 1).await?;
//! consume(&channel, "items", |item: RawItem| async move { handle(item).await }).await?;
//! ```

pub mod channel;
pub mod client;
pub mod error;
pub mod memory;
pub mod retry;

pub use channel::{
    consume, consume_until, process_delivery, settle, Delivery, DeliveryStream, MessageChannel,
    Settlement, CONTENT_TYPE,
};
pub use client::{ChannelState, ConnectionConfig, NatsChannel, NatsDelivery};
pub use error::{Error, Result};
pub use memory::{MemoryChannel, MemoryDelivery, PublishedMessage};
pub use retry::{Backoff, RetryPolicy};
