//! Race Game Server - authoritative multiplayer racing server
//!
//! Accepts TCP clients, parks them in lobbies and runs each match on
//! its own task: fixed-step physics, checkpoint racing against the
//! clock and per-tick world snapshots.

mod config;
mod game;
mod lobby;
mod net;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::lobby::GameManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.yml".to_string());
    let config = Arc::new(Config::load(&PathBuf::from(config_path))?);

    init_tracing(&config.server.log_level);

    info!("Starting Race Game Server");
    info!(bind_addr = %config.server.bind_addr, maps = config.server.maps.len(), "Configuration loaded");

    let manager = Arc::new(GameManager::new(config.clone()));
    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "Server listening");

    tokio::select! {
        _ = net::acceptor::run(listener, manager.clone()) => {}
        _ = shutdown_signal() => {}
    }

    manager.stop_all().await;
    info!("Server shutdown complete");
    Ok(())
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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
