//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;
use tesla_bridge_common::{EnvVars, LoggingConfig};

use crate::error::{BridgeError, Result};

/// Common CLI arguments for the bridge.
#[derive(Parser, Debug, Clone)]
#[command(about = "Tesla telemetry stream to MQTT bridge")]
#[command(version)]
pub struct BridgeArgs {
    /// Optional JSON5 configuration file (environment settings override it).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to a .env file with KEY=value settings.
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments from the process command line.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Load the `.env` file (if present) and snapshot the process environment.
    ///
    /// Variables already set in the process environment win over the file.
    pub fn environment(&self) -> Result<EnvVars> {
        match dotenvy::from_path(&self.env_file) {
            Ok(()) => {
                tracing::debug!(path = %self.env_file.display(), "Loaded .env file");
            }
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(BridgeError::ConfigParse(format!(
                    "Failed to read '{}': {}",
                    self.env_file.display(),
                    e
                )));
            }
        }

        Ok(std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect())
    }

    /// Apply `--debug` / `--log-level` on top of the configured logging.
    pub fn effective_logging(&self, configured: &LoggingConfig) -> LoggingConfig {
        let mut logging = configured.clone();
        if self.debug {
            logging.level = "debug".to_string();
        }
        if let Some(ref level) = self.log_level {
            logging.level = level.clone();
        }
        logging
    }
}
