use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use relief_analytics::alerter::AlertManager;
use relief_analytics::config::Config;
use relief_analytics::scheduler::Scheduler;
use relief_analytics::source;
use relief_analytics::AnalyticsEngine;

#[derive(Parser, Debug)]
#[command(name = "relief-analytics", about = "Streaming trend, anomaly and event correlation engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/relief-analytics/config.toml")]
    config: String,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("relief-analytics {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(&cli.config)?;

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %config.engine.instance,
        "Starting relief analytics engine"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Engine terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(&config.engine.log_level)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let engine = Arc::new(AnalyticsEngine::with_system_clock(&config));
    let sources = source::create_sources(&config, &engine)?;
    let alerter = AlertManager::new(&config.alerting)?;

    let (alert_tx, alert_rx) = tokio::sync::mpsc::channel(config.alerting.channel_capacity.max(1));
    let dispatcher = tokio::spawn(alerter.run(alert_rx));

    let scheduler = Scheduler::new(
        engine,
        sources,
        alert_tx,
        Duration::from_secs(config.scheduler.tick_secs),
    );
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, exiting");

    let ticks = handle.stop().await;
    // the scheduler owned the last sender, so the dispatcher drains and exits
    let stats = dispatcher.await?;
    info!(ticks, sent = stats.sent, deduplicated = stats.deduplicated, "Shutdown complete");

    Ok(())
}
