//! Logging setup on top of tracing-subscriber

use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{MatchmakingError, Result};

/// Configuration for the logging system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` directives still take precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

/// Install the global subscriber.
///
/// Fails if the level is unparseable or a global subscriber is already set.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| MatchmakingError::configuration(format!("Failed to install logger: {}", e)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| MatchmakingError::configuration(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
