//! Worker configuration from environment variables.

use anyhow::{Context, Result};
use nats_client::{ConnectionConfig, RetryPolicy};
use normalizer::PipelineConfig;
use std::str::FromStr;
use std::time::Duration;

/// Everything the worker needs at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub nats_url: String,
    pub username: Option<String>,
    pub password: String,
    pub app_id: String,
    pub connection_attempts: u32,
    pub retry_delay: Duration,
    /// When set, dial delays double after each failure up to this cap.
    pub retry_max_delay: Option<Duration>,
    pub consumer_queue: String,
    pub prefetch: usize,
    pub exchange: String,
    pub routing_key: String,
    pub publisher_queue: String,
    pub metrics_port: Option<u16>,
}

impl WorkerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let nats_url = match lookup("NATS_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => url,
            None => {
                let host = var("NATS_HOST", "localhost");
                let port: u16 = parse(&lookup, "NATS_PORT", 4222)?;
                format!("nats://{}:{}", host, port)
            }
        };

        let metrics_port = match lookup("METRICS_PORT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("METRICS_PORT is not a valid port: '{}'", raw))?,
            ),
            None => None,
        };

        let retry_max_delay = match lookup("NATS_RETRY_MAX_DELAY_SECS") {
            Some(raw) if !raw.trim().is_empty() => Some(Duration::from_secs(parse(
                &lookup,
                "NATS_RETRY_MAX_DELAY_SECS",
                0,
            )?)),
            _ => None,
        };

        Ok(Self {
            nats_url,
            username: lookup("NATS_USERNAME").filter(|v| !v.is_empty()),
            password: lookup("NATS_PASSWORD").unwrap_or_default(),
            app_id: var("NATS_APP_ID", "item-normalizer"),
            connection_attempts: parse(&lookup, "NATS_CONNECTION_ATTEMPTS", 5)?,
            retry_delay: Duration::from_secs(parse(&lookup, "NATS_RETRY_DELAY_SECS", 5)?),
            retry_max_delay,
            consumer_queue: var("CONSUMER_QUEUE_NAME", "items"),
            prefetch: parse(&lookup, "PREFETCH_COUNT", 1)?,
            exchange: var("PUBLISHER_EXCHANGE_NAME", "normalized"),
            routing_key: var("PUBLISHER_ROUTING_KEY", "normalized.items"),
            publisher_queue: var("PUBLISHER_QUEUE_NAME", "normalized-items"),
            metrics_port,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.connection_attempts, self.retry_delay);
        match self.retry_max_delay {
            Some(max) => policy.with_exponential_backoff(max),
            None => policy,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(&self.nats_url)
            .with_app_id(&self.app_id)
            .with_retry(self.retry_policy());

        match &self.username {
            Some(user) => config.with_credentials(user, &self.password),
            None => config,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            consumer_queue: self.consumer_queue.clone(),
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} is not a valid number: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nats_client::Backoff;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.username, None);
        assert_eq!(config.app_id, "item-normalizer");
        assert_eq!(config.connection_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.retry_policy().backoff, Backoff::Fixed);
        assert_eq!(config.consumer_queue, "items");
        assert_eq!(config.prefetch, 1);
        assert_eq!(config.exchange, "normalized");
        assert_eq!(config.routing_key, "normalized.items");
        assert_eq!(config.publisher_queue, "normalized-items");
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("NATS_HOST", "broker"),
            ("NATS_PORT", "4333"),
            ("NATS_USERNAME", "worker"),
            ("NATS_PASSWORD", "secret"),
            ("NATS_CONNECTION_ATTEMPTS", "3"),
            ("NATS_RETRY_DELAY_SECS", "1"),
            ("CONSUMER_QUEUE_NAME", "raw-items"),
            ("PREFETCH_COUNT", "10"),
            ("METRICS_PORT", "9100"),
        ])
        .unwrap();

        assert_eq!(config.nats_url, "nats://broker:4333");
        assert_eq!(config.username.as_deref(), Some("worker"));
        assert_eq!(config.password, "secret");
        assert_eq!(config.retry_policy(), RetryPolicy::fixed(3, Duration::from_secs(1)));
        assert_eq!(config.pipeline_config().consumer_queue, "raw-items");
        assert_eq!(config.prefetch, 10);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn test_max_delay_enables_exponential_backoff() {
        let config = config(&[
            ("NATS_RETRY_DELAY_SECS", "1"),
            ("NATS_RETRY_MAX_DELAY_SECS", "8"),
        ])
        .unwrap();

        let policy = config.retry_policy();
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                max: Duration::from_secs(8)
            }
        );
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(10), Duration::from_secs(8));
    }

    #[test]
    fn test_url_overrides_host_and_port() {
        let config = config(&[
            ("NATS_URL", "nats://nats.internal:4222"),
            ("NATS_HOST", "ignored"),
            ("NATS_PORT", "not-a-port"),
        ])
        .unwrap();

        assert_eq!(config.nats_url, "nats://nats.internal:4222");
    }

    #[test]
    fn test_bad_number_names_variable() {
        let err = config(&[("PREFETCH_COUNT", "lots")]).unwrap_err();
        assert!(err.to_string().contains("PREFETCH_COUNT"));

        let err = config(&[("METRICS_PORT", "99999")]).unwrap_err();
        assert!(err.to_string().contains("METRICS_PORT"));

        let err = config(&[("NATS_RETRY_MAX_DELAY_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("NATS_RETRY_MAX_DELAY_SECS"));
    }
}
