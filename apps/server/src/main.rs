//! Reverie Server - standalone headless server for the dream window.
//!
//! Accepts the GPU worker's frame stream, fans it out to browser viewers,
//! and manages the GPU pod lifecycle based on viewer presence. Designed to
//! run as a background daemon on a small VPS.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use reverie_core::{bootstrap_services, start_server, NetworkContext};
use tokio::signal;

use crate::config::ServerConfig;

/// Reverie Server - headless dream window streaming server.
#[derive(Parser, Debug)]
#[command(name = "reverie-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "REVERIE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "REVERIE_BIND_PORT")]
    port: Option<u16>,

    /// Public hostname used in embed URLs (overrides config file).
    #[arg(long, env = "REVERIE_PUBLIC_HOST")]
    public_host: Option<String>,

    /// Directory for persisted generation state.
    #[arg(short = 'd', long, env = "REVERIE_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Reverie Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(host) = args.public_host {
        config.public_host = host;
    }
    if let Some(state_dir) = args.state_dir {
        config.state_dir = state_dir;
    }

    log::info!(
        "Configuration: bind_port={}, public_host={}, state_dir={}",
        config.bind_port,
        config.public_host,
        config.state_dir.display()
    );

    let network = NetworkContext::explicit(config.bind_port, config.public_host.clone());

    // Bootstrap services
    let services = bootstrap_services(config.to_core_config(), network)
        .context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    // Start background tasks (pod transition -> viewer status forwarding)
    services.start_background_tasks();

    // Spawn the HTTP server
    let app_state = services.app_state();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;

    // Abort the server task (connections are already torn down)
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
