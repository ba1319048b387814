//! Matchmaking server
//!
//! Wires the entry store, the pairing engine and the expiry reaper together
//! and owns the lifetime of the reaper task.
//!
//! ```rust,no_run
//! use pairline_core::config::MatchmakingConfig;
//! use pairline_core::server::MatchmakingServerBuilder;
//!
//! # async fn example() -> pairline_core::Result<()> {
//! let mut server = MatchmakingServerBuilder::new()
//!     .with_config(MatchmakingConfig::default())
//!     .build()
//!     .await?;
//! server.start().await?;
//!
//! let response = server.engine().join("alice").await?;
//! println!("alice is {:?}", response.entry().status);
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MatchmakingConfig;
use crate::engine::PairingEngine;
use crate::error::{MatchmakingError, Result};
use crate::reaper::ExpiryReaper;
use crate::store::{EntryStore, SqliteEntryStore};

pub struct MatchmakingServer {
    engine: Arc<PairingEngine>,
    reaper: Arc<ExpiryReaper>,
    config: MatchmakingConfig,
    /// Handle to the reaper task while running
    reaper_handle: Option<JoinHandle<()>>,
}

impl MatchmakingServer {
    /// Create a server backed by the SQLite store named in the configuration
    pub async fn new(config: MatchmakingConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteEntryStore::connect(&config.database).await?;
        info!("✅ Entry store ready at {}", config.database.url);
        Ok(Self::with_parts(config, Arc::new(store), Arc::new(SystemClock)))
    }

    fn with_parts(config: MatchmakingConfig, store: Arc<dyn EntryStore>, clock: Arc<dyn Clock>) -> Self {
        let engine = Arc::new(PairingEngine::new(
            store.clone(),
            clock.clone(),
            config.queue.clone(),
        ));
        let reaper = Arc::new(ExpiryReaper::new(store, clock, &config.queue, &config.reaper));
        Self {
            engine,
            reaper,
            config,
            reaper_handle: None,
        }
    }

    /// Start background tasks
    pub async fn start(&mut self) -> Result<()> {
        if self.reaper_handle.is_some() {
            warn!("Matchmaking server already started");
            return Ok(());
        }

        if self.config.reaper.enabled {
            // clear anything a previous process left behind before serving
            let report = self.reaper.run_once().await?;
            if report.expired > 0 || report.released_claims > 0 {
                info!(
                    "Startup sweep removed {} entries and released {} claims",
                    report.expired, report.released_claims
                );
            }
            self.reaper_handle = Some(self.reaper.clone().spawn());
            info!("✅ Started expiry reaper");
        } else {
            info!("Expiry reaper disabled");
        }

        info!(
            "🚀 Matchmaking server started (wait window {}s, claim timeout {}s)",
            self.config.queue.wait_window_secs, self.config.queue.claim_timeout_secs
        );
        Ok(())
    }

    /// Stop background tasks. Queue state is left in the store.
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping matchmaking server...");
        if let Some(handle) = self.reaper_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("✅ Matchmaking server stopped");
        Ok(())
    }

    pub fn reaper_running(&self) -> bool {
        self.reaper_handle.is_some()
    }

    pub fn engine(&self) -> &Arc<PairingEngine> {
        &self.engine
    }

    pub fn reaper(&self) -> &Arc<ExpiryReaper> {
        &self.reaper
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }
}

/// Builder for [`MatchmakingServer`]
pub struct MatchmakingServerBuilder {
    config: Option<MatchmakingConfig>,
    store: Option<Arc<dyn EntryStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl MatchmakingServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            clock: None,
        }
    }

    pub fn with_config(mut self, config: MatchmakingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of connecting to the configured database
    pub fn with_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> Result<MatchmakingServer> {
        let config = self
            .config
            .ok_or_else(|| MatchmakingError::configuration("Configuration not provided"))?;
        config.validate()?;

        let store: Arc<dyn EntryStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteEntryStore::connect(&config.database).await?),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        Ok(MatchmakingServer::with_parts(config, store, clock))
    }
}

impl Default for MatchmakingServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
