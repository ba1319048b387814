//! Standalone matchmaking server
//!
//! Usage: `pairline-server [config.toml]`. Settings not in the file are taken
//! from `PAIRLINE__*` environment variables or defaults.

use std::path::PathBuf;

use anyhow::Context;
use pairline_core::config::MatchmakingConfig;
use pairline_core::logging::{log_welcome, setup_logging};
use pairline_core::server::MatchmakingServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = MatchmakingConfig::load(config_path.as_deref()).context("loading configuration")?;

    setup_logging(&config.logging)?;
    log_welcome(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Configuration loaded from {}", path.display());
    }

    let mut server = MatchmakingServer::new(config)
        .await
        .context("creating matchmaking server")?;
    server.start().await?;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    server.stop().await?;
    Ok(())
}
