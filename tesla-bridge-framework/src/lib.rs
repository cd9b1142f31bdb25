//! Tesla Bridge Framework
//!
//! Lifecycle, configuration and MQTT publishing shared by the bridge binary.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for layered configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for publishing readings to the MQTT broker with bounded queueing
//! - [`ReadingSink`] as the seam between vehicle pipelines and the broker
//! - [`BridgeArgs`] for CLI argument and `.env` handling
//! - [`BridgeStatus`] for retained bridge status reporting

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, PublishError, Result};
pub use publisher::{BusConnection, BusState, PublishStats, Publisher, ReadingSink, qos_from_level};
pub use runner::{BridgeRunner, shutdown_signal};
pub use status::{BridgeStatus, StatusPublisher};

// Re-export commonly used types from tesla-bridge-common
pub use tesla_bridge_common::{
    CanonicalReading, CanonicalValue, EnvVars, LogFormat, LoggingConfig, MqttConfig,
    TopicBuilder, VehicleIdentity, VehicleStatus,
};
