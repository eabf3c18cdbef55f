//! Client configuration, loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_timeout_ms() -> u64 {
    1000
}

fn default_routing_key() -> String {
    "rpc_queue".to_string()
}

fn default_max_pending() -> usize {
    10
}

/// Which feed drives the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// One JSON envelope per line from `command_file`.
    File,
    /// Randomly generated commands, bounded by `random_max`.
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Per-request reply timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    pub feed_type: FeedType,

    /// Command file for the file feed.
    #[serde(default)]
    pub command_file: Option<String>,

    /// Bound for the random feed; zero or negative means unbounded.
    #[serde(default)]
    pub random_max: i64,

    /// Service queue requests are published to.
    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    /// Cap on concurrently outstanding requests.
    #[serde(default = "default_max_pending")]
    pub max_pending_requests: usize,

    /// Broker URL; the `RABBITMQ_URL` environment variable wins over this.
    #[serde(default)]
    pub amqp_url: Option<String>,
}

impl ProducerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
