//! Normalizer service: consumes raw items, normalizes them and publishes the
//! result, acking only when every stage succeeded.

use crate::error::NormalizationError;
use crate::schema::RawItem;
use crate::traits::ItemNormalizer;
use bytes::Bytes;
use metrics::counter;
use nats_client::MessageChannel;
use prost::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Queue and exchange names the pipeline works with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Queue raw items are consumed from.
    pub consumer_queue: String,
    /// Exchange normalized items are published to.
    pub exchange: String,
    /// Routing key of published items.
    pub routing_key: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consumer_queue: "items".to_string(),
            exchange: "normalized".to_string(),
            routing_key: "normalized.items".to_string(),
        }
    }
}

/// Why a delivery was rejected after decoding.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("could not normalize item {id}: {source}")]
    Normalize {
        id: String,
        source: NormalizationError,
    },

    #[error("could not publish item {id}: {source}")]
    Publish {
        id: String,
        source: nats_client::Error,
    },
}

/// Normalize one item and publish it.
pub struct Pipeline<N: ItemNormalizer, C: MessageChannel> {
    normalizer: N,
    channel: Arc<C>,
    config: PipelineConfig,
}

impl<N: ItemNormalizer, C: MessageChannel> Pipeline<N, C> {
    pub fn new(normalizer: N, channel: Arc<C>, config: PipelineConfig) -> Self {
        Self {
            normalizer,
            channel,
            config,
        }
    }

    /// Normalize, encode and publish. Any error means the delivery is rejected.
    pub async fn process(&self, item: RawItem) -> Result<(), ProcessError> {
        let normalized = self.normalizer.normalize(&item).map_err(|source| {
            counter!("normalizer_messages_rejected_total", "stage" => "normalize").increment(1);
            ProcessError::Normalize {
                id: item.id.clone(),
                source,
            }
        })?;

        let payload = Bytes::from(normalized.encode_to_vec());
        self.channel
            .publish(&self.config.exchange, &self.config.routing_key, payload)
            .await
            .map_err(|source| {
                counter!("normalizer_messages_rejected_total", "stage" => "publish").increment(1);
                ProcessError::Publish {
                    id: normalized.id.clone(),
                    source,
                }
            })?;

        counter!("normalizer_messages_published_total").increment(1);
        debug!(
            "[{}] Published item {} with {} dimension(s) to {}",
            N::NAME,
            normalized.id,
            normalized.dimensions.len(),
            self.config.routing_key
        );
        Ok(())
    }
}

/// Runs a [`Pipeline`] over the consumer queue until shutdown.
///
/// Deliveries are processed one at a time, in broker order.
pub struct NormalizerService<N: ItemNormalizer, C: MessageChannel> {
    pipeline: Pipeline<N, C>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<N: ItemNormalizer, C: MessageChannel> NormalizerService<N, C> {
    pub fn new(
        normalizer: N,
        channel: Arc<C>,
        config: PipelineConfig,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(normalizer, channel, config),
            shutdown_rx,
        }
    }

    /// Run until the shutdown signal fires or the delivery stream ends.
    pub async fn run(self) -> nats_client::Result<()> {
        let Self {
            pipeline,
            mut shutdown_rx,
        } = self;

        info!(
            "Starting {} normalizer: {} -> {} ({})",
            N::NAME,
            pipeline.config.consumer_queue,
            pipeline.config.exchange,
            pipeline.config.routing_key
        );

        let shutdown = async move {
            shutdown_rx.recv().await;
            info!("{} normalizer received shutdown signal", N::NAME);
        };

        let pipeline = &pipeline;
        nats_client::consume_until(
            pipeline.channel.as_ref(),
            &pipeline.config.consumer_queue,
            move |item: RawItem| pipeline.process(item),
            shutdown,
        )
        .await?;

        info!("{} normalizer service stopped", N::NAME);
        Ok(())
    }
}

/// Builder for creating normalizer services with custom configuration.
pub struct NormalizerServiceBuilder<N: ItemNormalizer> {
    normalizer: N,
    config: PipelineConfig,
}

impl<N: ItemNormalizer> NormalizerServiceBuilder<N> {
    pub fn new(normalizer: N) -> Self {
        Self {
            normalizer,
            config: PipelineConfig::default(),
        }
    }

    /// Set the queue to consume raw items from.
    pub fn consumer_queue(mut self, queue: impl Into<String>) -> Self {
        self.config.consumer_queue = queue.into();
        self
    }

    /// Set the exchange to publish normalized items to.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    /// Set the routing key of published items.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.config.routing_key = routing_key.into();
        self
    }

    pub fn build<C: MessageChannel>(
        self,
        channel: Arc<C>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> NormalizerService<N, C> {
        NormalizerService::new(self.normalizer, channel, self.config, shutdown_rx)
    }
}
