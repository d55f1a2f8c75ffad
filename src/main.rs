//! worker-net: worker network bootstrap.
//!
//! This is the binary entry point. It parses CLI arguments, loads configuration
//! from TOML, initializes tracing, starts the worker (monitoring, handler,
//! listeners) and shuts it down on Ctrl+C or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worker_net::config::{
    WorkerConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER, MONITORING_SHUTDOWN_TIMEOUT,
};
use worker_net::http::shutdown::shutdown_signal;
use worker_net::{Environment, StandbyHandler, Worker};

/// worker-net: bring a worker onto the network
#[derive(Parser, Debug)]
#[command(name = "worker-net", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "worker_net=debug,axum_server=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the configured environment (production, staging, development)
    #[arg(short, long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = WorkerConfig::load(&args.config)?;
    if let Some(environment) = &args.environment {
        config.environment = Environment::parse(environment);
        config.validate()?;
    }

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        config = %args.config,
        environment = %config.environment,
        port = config.server.port,
        https_port = config.server.https_port,
        "Loaded configuration"
    );

    // Both ring and aws-lc-rs may be compiled in; pick one explicitly
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let worker = Worker::new(config, Arc::new(StandbyHandler::new()));
    worker.run().await?;

    shutdown_signal().await;
    worker.shutdown(MONITORING_SHUTDOWN_TIMEOUT).await;

    tracing::info!("Worker stopped");
    Ok(())
}
