//! Zone presence - radar zone occupancy service
//!
//! Reads LD2450 frames over serial, latches per-zone occupancy, drives a
//! presence indicator and streams target positions over WebSocket. Zone
//! geometry can be changed at runtime over HTTP.
//!
//! Module structure:
//! - `domain/` - Targets, zones, occupancy, telemetry records
//! - `io/` - Sensor link, indicator, network probe, HTTP/WebSocket
//! - `services/` - Cycle loop, classifier, occupancy, resilience, zone store
//! - `infra/` - Config and metrics

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use zone_presence::infra::{Config, Metrics};
use zone_presence::io::{
    indicator, start_http_server, ConnectivityGateway, HttpState, Ld2450Link, SensorLink,
    TelemetryPublisher,
};
use zone_presence::services::{CycleRunner, ZoneConfigService, ZoneStore};

/// Zone presence - LD2450 zone occupancy service
#[derive(Parser, Debug)]
#[command(name = "zone-presence", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-target lines
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "zone-presence starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        sensor_device = %config.sensor_device(),
        sensor_baud = %config.sensor_baud(),
        target_count = %config.target_count(),
        stall_threshold = %config.stall_threshold(),
        network_interface = ?config.network_interface(),
        block_cycle_until_connected = %config.block_cycle_until_connected(),
        http_port = %config.http_port(),
        zones = ?config.initial_zones(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let zones = ZoneStore::new(config.initial_zones());
    let telemetry = Arc::new(TelemetryPublisher::new(config.subscriber_buffer(), metrics.clone()));

    // Connectivity supervision runs beside the cycle loop
    let gateway = ConnectivityGateway::from_config(&config);
    let connectivity = gateway.status(config.block_cycle_until_connected());
    let gateway_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        gateway.run(gateway_shutdown).await;
    });

    // Zone API and telemetry stream
    let addr: SocketAddr = format!("{}:{}", config.http_bind_address(), config.http_port())
        .parse()
        .with_context(|| format!("Invalid HTTP bind address {}", config.http_bind_address()))?;
    let http_state = HttpState::new(
        ZoneConfigService::new(zones.clone(), metrics.clone()),
        telemetry.clone(),
        shutdown_rx.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_http_server(addr, http_state, http_shutdown).await {
            error!(error = %format!("{:#}", e), "http_server_error");
        }
    });

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Open the sensor; a failure here is handled like any later stall
    let mut link = Ld2450Link::new(&config);
    link.set_number_of_targets(config.target_count());
    if let Err(e) = link.begin().await {
        error!(error = %format!("{:#}", e), "sensor_open_failed");
    }

    let indicator = indicator::from_config(config.indicator_gpio_path());
    let runner = CycleRunner::new(link, indicator, zones, telemetry, &config, metrics)
        .with_connectivity(connectivity);

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    runner.run(shutdown_rx).await;

    info!("zone-presence shutdown complete");
    Ok(())
}
