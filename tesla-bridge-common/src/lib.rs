//! Tesla Bridge Common Library
//!
//! This crate provides shared types and utilities for the telemetry bridge:
//!
//! - [`telemetry`] - Data model (`VehicleIdentity`, `RawField`, `CanonicalReading`,
//!   `VehicleStatus`)
//! - [`payload`] - MQTT payload encoding
//! - [`config`] - Broker/logging configuration, JSON5 loading and env-style settings
//! - [`topic`] - Topic builders and parsers
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod payload;
pub mod telemetry;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{
    EnvVars, LogFormat, LoggingConfig, MqttConfig, env_bool, env_parse, env_string, parse_config,
};
pub use error::{Error, Result};
pub use payload::{encode_json, encode_value, format_number};
pub use telemetry::{
    CanonicalReading, CanonicalValue, Location, RawField, RawValue, VehicleIdentity,
    VehicleStatus,
};
pub use topic::{DEFAULT_TOPIC_PREFIX, ParsedTopic, TopicBuilder, parse_topic};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use tesla_bridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
