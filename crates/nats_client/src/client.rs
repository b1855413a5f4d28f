//! JetStream implementation of [`MessageChannel`].
//!
//! AMQP-style topology is mapped onto JetStream:
//!
//! - an exchange is an interest-retention stream named after it, capturing
//!   its routing keys, so a message is dropped once its bound queue acks it;
//! - a queue bound to an exchange is a durable pull consumer filtered on the
//!   routing key;
//! - a consumer queue is a work-queue stream plus a durable consumer, both
//!   named after the queue, capturing the subject `<queue>`;
//! - the prefetch limit is the consumer's `max_ack_pending`;
//! - rejection without redelivery is `AckKind::Term`.

use crate::channel::{Delivery, DeliveryStream, MessageChannel, CONTENT_TYPE};
use crate::error::{Error, Result};
use crate::retry::{retry, RetryPolicy};
use async_nats::header::{self, HeaderMap};
use async_nats::jetstream::consumer::{pull, AckPolicy, Consumer};
use async_nats::jetstream::stream::{self, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Max messages kept per stream.
pub const DEFAULT_MAX_MESSAGES: i64 = 1_000_000;

/// Max bytes kept per stream (1GB).
pub const DEFAULT_MAX_BYTES: i64 = 1_073_741_824;

/// Header carrying the publishing application's identifier.
pub const APP_ID_HEADER: &str = "App-Id";

/// Header carrying the payload content type.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Lifecycle of a [`NatsChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connected,
    /// At least one publisher or consumer topology is declared.
    TopologyReady,
    /// A delivery stream is open.
    Consuming,
}

/// Connection settings for a [`NatsChannel`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server URL (e.g., "nats://localhost:4222").
    pub url: String,
    /// Username and password, if the server requires them.
    pub credentials: Option<(String, String)>,
    /// Identifier attached to published messages and used as connection name.
    pub app_id: String,
    /// Dial retry policy.
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            app_id: String::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set username and password.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the application identifier.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Set the dial retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn options(&self) -> ConnectOptions {
        let mut options = match &self.credentials {
            Some((user, pass)) => {
                ConnectOptions::with_user_and_password(user.clone(), pass.clone())
            }
            None => ConnectOptions::new(),
        };
        if !self.app_id.is_empty() {
            options = options.name(self.app_id.clone());
        }
        options
    }
}

struct Connection {
    client: Client,
    jetstream: jetstream::Context,
}

/// Message channel backed by NATS JetStream.
pub struct NatsChannel {
    config: ConnectionConfig,
    connection: Option<Connection>,
    /// Declared consumers, keyed by queue name.
    consumers: HashMap<String, Consumer<pull::Config>>,
    publisher_ready: bool,
    consuming: AtomicBool,
}

impl NatsChannel {
    /// Create a disconnected channel.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connection: None,
            consumers: HashMap::new(),
            publisher_ready: false,
            consuming: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.connection.is_none() {
            ChannelState::Disconnected
        } else if self.consuming.load(Ordering::SeqCst) {
            ChannelState::Consuming
        } else if self.publisher_ready || !self.consumers.is_empty() {
            ChannelState::TopologyReady
        } else {
            ChannelState::Connected
        }
    }

    /// Dial the server, retrying per the configured policy.
    ///
    /// Fails with [`Error::Connection`] once every attempt is spent.
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let url = self.config.url.clone();
        let attempts = self.config.retry.attempts();
        info!("Connecting to NATS at {}", url);

        let client = retry(&self.config.retry, |attempt| {
            let options = self.config.options();
            let url = url.clone();
            async move {
                debug!("Dialing NATS ({}/{})", attempt, attempts);
                options.connect(url.as_str()).await
            }
        })
        .await
        .map_err(|e| Error::Connection {
            attempts: e.attempts,
            message: e.last.to_string(),
        })?;

        let jetstream = jetstream::new(client.clone());
        self.connection = Some(Connection { client, jetstream });
        info!("Connected to NATS at {}", url);
        Ok(())
    }

    /// Declare the outbound exchange, its bound queue and the binding.
    pub async fn setup_publisher(
        &mut self,
        exchange: &str,
        routing_key: &str,
        queue: &str,
    ) -> Result<()> {
        let jetstream = &self.connection()?.jetstream;
        let config = exchange_stream_config(exchange, routing_key);

        info!(
            "Ensuring exchange '{}' (stream {}) routes '{}' to queue '{}'",
            exchange, config.name, routing_key, queue
        );

        let stream = jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| Error::Topology(format!("exchange '{}': {}", exchange, e)))?;

        let durable = durable_name(queue);
        let _: Consumer<pull::Config> = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: routing_key.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Topology(format!("queue '{}': {}", queue, e)))?;

        self.publisher_ready = true;
        info!("Publisher topology for '{}' ready", exchange);
        Ok(())
    }

    /// Declare the inbound queue and cap unacknowledged deliveries at `prefetch`.
    ///
    /// A prefetch of zero means no limit.
    pub async fn setup_consumer(&mut self, queue: &str, prefetch: usize) -> Result<()> {
        let jetstream = &self.connection()?.jetstream;
        let config = queue_stream_config(queue);
        let max_ack_pending = max_ack_pending(prefetch);

        info!(
            "Ensuring queue '{}' (stream {}) with prefetch {}",
            queue, config.name, prefetch
        );

        let stream = jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| Error::Topology(format!("queue '{}': {}", queue, e)))?;

        let durable = durable_name(queue);
        let consumer: Consumer<pull::Config> = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Topology(format!("consumer '{}': {}", durable, e)))?;

        let existing = consumer.cached_info().config.max_ack_pending;
        if existing != max_ack_pending {
            warn!(
                "Consumer '{}' already exists with max_ack_pending {} (requested {})",
                durable, existing, max_ack_pending
            );
        }

        self.consumers.insert(queue.to_string(), consumer);
        Ok(())
    }

    /// Release the connection. Safe to call in any state, any number of times.
    pub async fn close(&mut self) {
        self.consumers.clear();
        self.publisher_ready = false;
        self.consuming.store(false, Ordering::SeqCst);

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.client.flush().await {
                warn!("Failed to flush NATS connection on close: {}", e);
            }
            info!("NATS connection closed");
        }
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or(Error::NotReady("not connected"))
    }
}

#[async_trait]
impl MessageChannel for NatsChannel {
    type Delivery = NatsDelivery;

    async fn deliveries(&self, queue: &str) -> Result<DeliveryStream<NatsDelivery>> {
        self.connection()?;
        let consumer = self
            .consumers
            .get(queue)
            .ok_or(Error::NotReady("queue not declared"))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Receive(e.to_string()))?;
        self.consuming.store(true, Ordering::SeqCst);

        Ok(messages
            .map(|msg| {
                msg.map(|inner| NatsDelivery { inner })
                    .map_err(|e| Error::Receive(e.to_string()))
            })
            .boxed())
    }

    /// Publish and wait for the stream acknowledgement.
    ///
    /// Fails when no stream captures `routing_key` or when it is captured by a
    /// stream other than `exchange`.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()> {
        let connection = self.connection()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE_HEADER, CONTENT_TYPE);
        headers.insert(header::NATS_EXPECTED_STREAM, stream_name(exchange).as_str());
        if !self.config.app_id.is_empty() {
            headers.insert(APP_ID_HEADER, self.config.app_id.as_str());
        }

        let ack = connection
            .jetstream
            .publish_with_headers(routing_key.to_string(), headers, payload)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        debug!(
            "Published to {} (stream {}, seq {})",
            routing_key, ack.stream, ack.sequence
        );
        Ok(())
    }
}

/// JetStream message awaiting settlement.
pub struct NatsDelivery {
    inner: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn reject(&self) -> Result<()> {
        self.inner
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}

/// Stream name for an exchange or queue: upper-cased, with characters that
/// JetStream forbids in names replaced by `_`.
pub fn stream_name(name: &str) -> String {
    sanitize(name).to_uppercase()
}

/// Stream backing an exchange. Messages live until every bound queue has
/// acked them, within the size caps.
fn exchange_stream_config(exchange: &str, routing_key: &str) -> stream::Config {
    stream::Config {
        name: stream_name(exchange),
        subjects: vec![routing_key.to_string()],
        retention: RetentionPolicy::Interest,
        max_messages: DEFAULT_MAX_MESSAGES,
        max_bytes: DEFAULT_MAX_BYTES,
        storage: StorageType::File,
        ..Default::default()
    }
}

/// Stream backing a consumer queue. Acked messages are removed.
fn queue_stream_config(queue: &str) -> stream::Config {
    stream::Config {
        name: stream_name(queue),
        subjects: vec![queue.to_string()],
        retention: RetentionPolicy::WorkQueue,
        max_messages: DEFAULT_MAX_MESSAGES,
        max_bytes: DEFAULT_MAX_BYTES,
        storage: StorageType::File,
        ..Default::default()
    }
}

/// Durable consumer name for a queue.
pub fn durable_name(name: &str) -> String {
    sanitize(name)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn max_ack_pending(prefetch: usize) -> i64 {
    if prefetch == 0 {
        -1
    } else {
        i64::try_from(prefetch).unwrap_or(i64::MAX)
    }
}
