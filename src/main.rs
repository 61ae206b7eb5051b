//! stats-meter - Entry Point
//!
//! Boots the configured exporters on the process-wide registry and emits a
//! heartbeat until shutdown, for checking an exporter setup end to end.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use stats_meter::{global, Config, VERSION};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stats-meter.toml"));

    // Load configuration
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    stats_meter::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting stats-meter"
    );

    let registry = global();
    registry
        .init(&config.metrics)
        .context("Failed to initialize metrics")?;

    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut beats: u64 = 0;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let _timer = registry.task_latency("heartbeat");
                beats += 1;
                registry.add_counter("heartbeats_total", 1.0);
                registry.add_up_down_counter("heartbeat_parity", if beats % 2 == 1 { 1 } else { -1 });
            }
            _ = &mut shutdown => {
                info!(beats, "Shutdown signal received");
                break;
            }
        }
    }

    registry.shutdown();
    info!("Stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
