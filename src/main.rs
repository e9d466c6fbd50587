//! Surviveler Game Server - authoritative server for the Surviveler game
//!
//! Entry point: parses the command line and settings file, loads the game
//! assets, binds the game and admin ports and runs until Ctrl+C or SIGTERM.

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use surviveler_server::config::{Cli, Config};
use surviveler_server::game::data::GameData;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli)?;

    init_tracing(&config.log_level);

    info!("Starting Surviveler server");
    info!(
        port = config.port,
        telnet_port = config.telnet_port,
        assets = %config.assets.display(),
        "Configuration loaded"
    );

    let data = GameData::load(&config.assets)
        .with_context(|| format!("Failed to load assets from {}", config.assets.display()))?;

    let addr = config.server_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind game port {addr}"))?;

    let admin_addr = config.admin_addr();
    let admin_listener = match TcpListener::bind(admin_addr).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!(addr = %admin_addr, error = %e, "Admin console unavailable");
            None
        }
    };

    surviveler_server::run(config, data, listener, admin_listener, shutdown_signal()).await
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
