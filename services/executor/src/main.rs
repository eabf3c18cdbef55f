//! Command executor server binary.
//!
//! Usage:
//!   command-executor --config config/executor.toml
//!
//! Without `--config`, the stock deployment defaults apply (queue
//! `rpc_queue`, 5 workers).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use executor_service::{Consumer, ExecutorConfig, MapCommandHandler};
use messaging::{broker_url, AmqpServer, RpcServer};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "command-executor")]
#[command(about = "Command executor RPC server")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => ExecutorConfig::from_file(path)?,
        None => ExecutorConfig::default(),
    };

    let url = broker_url(config.amqp_url.as_deref());
    let server = Arc::new(
        AmqpServer::connect(&url, config.routing_key.clone(), config.server_options())
            .await
            .context("failed to connect to the broker")?,
    );

    let handler = Arc::new(MapCommandHandler::new());
    let mut consumer = Consumer::new(Arc::clone(&server), config.workers, handler);
    consumer
        .start()
        .await
        .context("failed to start the consumer")?;

    info!(
        queue = %config.routing_key,
        workers = config.workers,
        "command executor is running, press Ctrl+C to exit"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;

    info!("shutting down");
    consumer.stop().await;
    server.close().await.context("failed to close the server")?;

    Ok(())
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
