//! Main entry point for the item normalization worker.

mod config;

use anyhow::{bail, Context, Result};
use config::WorkerConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::NatsChannel;
use normalizer::{FieldNormalizer, NormalizerService};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Wait for `signal`, then ask the service to stop.
///
/// Returns `false` when the service dropped its receiver first, meaning it
/// stopped without being asked to.
async fn wait_for_shutdown<F>(shutdown_tx: &mpsc::Sender<()>, signal: F) -> bool
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = signal => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down normalizer...");
            let _ = shutdown_tx.send(()).await;
            true
        }
        _ = shutdown_tx.closed() => {
            error!("Normalizer stopped before shutdown was requested");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting item normalizer...");

    let config = WorkerConfig::from_env()?;

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Prometheus metrics available at http://0.0.0.0:{}/metrics", port);
    }

    let mut channel = NatsChannel::new(config.connection_config());
    channel.connect().await?;
    channel
        .setup_publisher(&config.exchange, &config.routing_key, &config.publisher_queue)
        .await?;
    channel
        .setup_consumer(&config.consumer_queue, config.prefetch)
        .await?;

    let normalizer = FieldNormalizer::new().context("failed to build normalization rules")?;
    let channel = Arc::new(channel);

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let service = NormalizerService::new(
        normalizer,
        channel.clone(),
        config.pipeline_config(),
        shutdown_rx,
    );

    let service_handle = tokio::spawn(async move {
        if let Err(e) = service.run().await {
            error!("Normalizer failed: {:?}", e);
        }
    });

    info!("Normalizer service spawned");

    let requested = wait_for_shutdown(&shutdown_tx, tokio::signal::ctrl_c()).await;

    if let Err(e) = service_handle.await {
        error!("Normalizer task panicked: {:?}", e);
    }

    match Arc::try_unwrap(channel) {
        Ok(mut channel) => channel.close().await,
        Err(_) => warn!("NATS channel still shared at exit, skipping close"),
    }

    if !requested {
        bail!("delivery stream for '{}' ended unexpectedly", config.consumer_queue);
    }

    info!("Item normalizer stopped");
    Ok(())
}
