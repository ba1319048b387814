//! Configuration for pairline-core
//!
//! Values come from defaults, an optional config file, and environment
//! variables prefixed with `PAIRLINE`, with `__` separating nested keys:
//!
//! ```text
//! PAIRLINE__DATABASE__URL=sqlite:///var/lib/pairline/queue.db
//! PAIRLINE__QUEUE__WAIT_WINDOW_SECS=300
//! PAIRLINE__REAPER__SWEEP_INTERVAL_SECS=60
//! ```

use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::{MatchmakingError, Result};
use crate::logging::LoggingConfig;

const ENV_PREFIX: &str = "PAIRLINE";
const ENV_SEPARATOR: &str = "__";

/// Upper bound for every duration setting (one week)
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub reaper: ReaperConfig,
    pub logging: LoggingConfig,
}

/// Entry store connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL; in-memory URLs are pinned to a single connection
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

/// Pairing protocol timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum lifetime of any entry
    pub wait_window_secs: u64,
    /// How long a claim may stay uncommitted before it is reverted
    pub claim_timeout_secs: u64,
    /// Claim attempts a join makes before settling as waiting
    pub max_claim_attempts: u32,
}

/// Background expiry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
}

impl MatchmakingConfig {
    /// Load configuration from the environment only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load configuration from an optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        Self::from_builder(builder.add_source(environment()))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(MatchmakingError::configuration("database.url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(MatchmakingError::configuration("database.max_connections must be at least 1"));
        }
        self.queue.validate()?;
        check_duration("reaper.sweep_interval_secs", self.reaper.sweep_interval_secs)?;
        Ok(())
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        check_duration("queue.wait_window_secs", self.wait_window_secs)?;
        check_duration("queue.claim_timeout_secs", self.claim_timeout_secs)?;
        if self.claim_timeout_secs >= self.wait_window_secs {
            return Err(MatchmakingError::configuration(format!(
                "queue.claim_timeout_secs ({}) must be shorter than queue.wait_window_secs ({})",
                self.claim_timeout_secs, self.wait_window_secs
            )));
        }
        if self.max_claim_attempts == 0 {
            return Err(MatchmakingError::configuration("queue.max_claim_attempts must be at least 1"));
        }
        Ok(())
    }

    /// The wait window, clamped to [`MAX_DURATION_SECS`] if `validate` was skipped
    pub fn wait_window(&self) -> chrono::Duration {
        bounded(self.wait_window_secs)
    }

    /// The claim timeout, clamped to [`MAX_DURATION_SECS`] if `validate` was skipped
    pub fn claim_timeout(&self) -> chrono::Duration {
        bounded(self.claim_timeout_secs)
    }
}

impl ReaperConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.min(MAX_DURATION_SECS))
    }
}

fn check_duration(key: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(MatchmakingError::configuration(format!("{} must be positive", key)));
    }
    if secs > MAX_DURATION_SECS {
        return Err(MatchmakingError::configuration(format!(
            "{} ({}) exceeds the maximum of {} seconds",
            key, secs, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

fn bounded(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::zero())
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_window_secs: 300,
            claim_timeout_secs: 10,
            max_claim_attempts: 3,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 300,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
