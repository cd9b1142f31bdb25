//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// MQTT broker connection failed permanently.
    #[error("MQTT connection error: {0}")]
    MqttConnection(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Worker error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }
}

impl From<tesla_bridge_common::Error> for BridgeError {
    fn from(err: tesla_bridge_common::Error) -> Self {
        match err {
            tesla_bridge_common::Error::Io(e) => Self::Io(e),
            tesla_bridge_common::Error::Json(e) => Self::Serialization(e.to_string()),
            other => Self::ConfigValidation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Errors returned by a single publish call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The publish could not be queued before the deadline.
    #[error("Publish to {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    /// The broker connection failed permanently (e.g. bad credentials).
    #[error("MQTT connection is in terminal failure: {0}")]
    Terminal(String),

    /// The MQTT client rejected the request (event loop gone).
    #[error("Failed to publish to {topic}: {message}")]
    Client { topic: String, message: String },

    /// The value could not be encoded.
    #[error("Failed to encode payload for {topic}: {message}")]
    Encode { topic: String, message: String },
}

impl PublishError {
    /// Whether a later publish may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_classification() {
        let timeout = PublishError::Timeout {
            topic: "cars/1/speed".to_string(),
            timeout_ms: 5000,
        };
        assert!(timeout.is_transient());
        assert!(!PublishError::Terminal("bad credentials".to_string()).is_transient());
    }

    #[test]
    fn test_common_error_conversion() {
        let err: BridgeError = tesla_bridge_common::Error::Config("no vehicles".to_string()).into();
        assert!(matches!(err, BridgeError::ConfigValidation(_)));
    }
}
