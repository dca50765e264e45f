//! curfew-watch - curfew violation detection service
//!
//! Accepts parolee movements over HTTP, evaluates each against the parolee's
//! curfew, and notifies long-poll waiters of violations and stream clients of
//! every movement they follow.
//!
//! Module structure:
//! - `domain/` - Core value types (GeoPosition, Movement, Curfew) and geometry
//! - `services/` - Curfew evaluation, subscription registry, dispatch, monitor
//! - `io/` - HTTP adapter and Prometheus formatting
//! - `infra/` - Config and Metrics

use clap::Parser;
use curfew_watch::infra::{Config, Metrics};
use curfew_watch::io::{start_http_server, HttpState};
use curfew_watch::services::CurfewMonitor;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Curfew violation detection and notification service
#[derive(Parser, Debug)]
#[command(name = "curfew-watch", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-movement visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.json);

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "curfew_watch_starting");

    let config = Config::load(args.config.as_deref());
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_bind = %config.http_bind_address(),
        http_port = %config.http_port(),
        dispatch_workers = %config.dispatch_workers(),
        dispatch_queue_size = %config.dispatch_queue_size(),
        stream_buffer_size = %config.stream_buffer_size(),
        long_poll_timeout_secs = %config.long_poll_timeout_secs(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let monitor = Arc::new(CurfewMonitor::new(&config, metrics.clone()));

    // HTTP adapter
    let http_state = Arc::new(HttpState::from_config(monitor.clone(), &config));
    let http_config = config.clone();
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = start_http_server(&http_config, http_state, http_shutdown).await {
            error!(error = %e, "http_server_error");
        }
    });

    // Metrics reporter and housekeeping
    let reporter_monitor = monitor.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    let reporter_task = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    reporter_monitor.prune_abandoned();
                    reporter_monitor.sample_gauges();
                    reporter_monitor.metrics().report().log();
                }
                _ = reporter_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    let _ = http_task.await;
    let _ = reporter_task.await;
    monitor.shutdown().await;
    metrics.report().log();

    info!("curfew_watch_shutdown_complete");
    Ok(())
}
