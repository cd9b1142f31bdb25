use thiserror::Error;

/// Common error type for bridge components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid topic: {0}")]
    Topic(String),
}

impl Error {
    /// Create an invalid setting error for an environment key.
    pub fn invalid_setting(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidSetting {
            key: key.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using the bridge's common Error.
pub type Result<T> = std::result::Result<T, Error>;
