//! Command producer client binary.
//!
//! Usage:
//!   command-producer --config config/producer.toml
//!
//! Drives the configured feed against the command executor's service queue
//! and logs every response, capping in-flight requests at
//! `max_pending_requests`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use messaging::{broker_url, AmqpClient, AmqpClientOptions, RpcClient};
use producer_service::{
    FeedType, FileRequestFeed, Producer, ProducerConfig, RandomRequestFeed, RequestFeed,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "command-producer")]
#[command(about = "Feed-driven command producer")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = ProducerConfig::from_file(&args.config)?;
    let feed = build_feed(&config)?;

    let url = broker_url(config.amqp_url.as_deref());
    let client = Arc::new(
        AmqpClient::connect(
            &url,
            config.routing_key.clone(),
            AmqpClientOptions {
                // Abandoned correlations are reaped on the same clock the
                // producer races replies against.
                request_timeout: Some(config.timeout()),
            },
        )
        .await
        .context("failed to connect to the broker")?,
    );

    let handler: producer_service::ResponseHandler = Arc::new(|body: &[u8]| {
        info!("<< {}", String::from_utf8_lossy(body));
        Ok(())
    });

    let producer = Producer::new(
        Arc::clone(&client),
        handler,
        feed,
        config.timeout(),
        config.max_pending_requests,
    );

    info!(
        queue = %config.routing_key,
        max_pending = config.max_pending_requests,
        "producer is running, press Ctrl+C to exit"
    );

    tokio::select! {
        result = producer.start() => {
            result?;
            info!("feed drained");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    producer.close().await;
    client.close().await.context("failed to close the client")?;

    Ok(())
}

fn build_feed(config: &ProducerConfig) -> Result<Box<dyn RequestFeed>> {
    match config.feed_type {
        FeedType::File => {
            let Some(path) = config.command_file.as_deref() else {
                bail!("command_file must be set for the file feed");
            };
            let feed = FileRequestFeed::open(path)
                .with_context(|| format!("failed to open command file {path}"))?;
            Ok(Box::new(feed))
        }
        FeedType::Random => Ok(Box::new(RandomRequestFeed::new(config.random_max))),
    }
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}
