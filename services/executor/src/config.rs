//! Server configuration, loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use messaging::AmqpServerOptions;
use serde::Deserialize;

fn default_routing_key() -> String {
    "rpc_queue".to_string()
}

fn default_workers() -> usize {
    5
}

fn default_retry_count() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Service queue the server consumes.
    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    /// Worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Broker URL; the `RABBITMQ_URL` environment variable wins over this.
    #[serde(default)]
    pub amqp_url: Option<String>,

    /// Declare the service queue as durable.
    #[serde(default)]
    pub durable_queue: bool,

    /// Total reply publish attempts (1 = no retry).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Delay between reply publish attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            routing_key: default_routing_key(),
            workers: default_workers(),
            amqp_url: None,
            durable_queue: false,
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn server_options(&self) -> AmqpServerOptions {
        AmqpServerOptions {
            durable_queue: self.durable_queue,
            retry_count: self.retry_count,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
