//! Trade Views - denormalized trade store CLI
//!
//! Bootstraps the configured substrate and runs one command against it.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use trade_views_database::{StoreConfig, TradeStore};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Cli::parse();

    // Held until exit so buffered log lines reach the file
    let _guard = init_tracing(&args.log_level)?;

    info!("Starting trade-views v{}", env!("CARGO_PKG_VERSION"));

    let mut config = StoreConfig::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.backend = backend.into();
    }
    config.validate()?;

    info!(
        backend = ?config.backend,
        keyspace = %config.keyspace.name,
        environment = %config.environment,
        "Configuration loaded"
    );

    let store = TradeStore::connect(config).await?;

    if args.seed {
        let loader = &store.config().loader;
        store
            .bulk_load(loader.accounts, loader.positions, loader.trades)
            .await?;
    }

    if let Err(e) = cli::run(&store, args.command, args.json).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Define log file appender (rolling daily)
    let file_appender = tracing_appender::rolling::daily("logs", "trade-views.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Parse log level
    let level_filter = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    // Human readable on stderr so stdout carries only command output
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    // Registry
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
