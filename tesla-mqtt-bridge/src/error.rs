//! Error types for the bridging engine.

use thiserror::Error;

use tesla_bridge_common::VehicleStatus;
use tesla_bridge_framework::BridgeError;

/// Invalid or missing startup settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("At least one vehicle must be configured (VIN_CAR_1 .. VIN_CAR_9)")]
    NoVehicles,

    #[error("TESLA_API_TOKEN is required")]
    MissingToken,

    #[error("Stream URI '{0}' must be a ws:// or wss:// URL")]
    InvalidStreamUri(String),

    #[error("Car number {0} is outside 1..=9")]
    CarNumberOutOfRange(u8),

    #[error("Car number {0} is configured more than once")]
    DuplicateCarNumber(u8),

    #[error("Vehicle for car {0} has an empty identifier")]
    EmptyVin(u8),

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("{setting} must be at most {max} seconds")]
    TooLong { setting: &'static str, max: u64 },
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::validation(err.to_string())
    }
}

/// A field whose value does not fit its field class.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Malformed value for field {field}: {reason}")]
pub struct MalformedFieldError {
    pub field: String,
    pub reason: String,
}

impl MalformedFieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A stream message that could not be decoded at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Unexpected binary frame ({0} bytes)")]
    Binary(usize),
}

/// Reasons a streaming session ends and enters backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection timed out after {0}s")]
    ConnectTimeout(u64),

    #[error("No subscription acknowledgment within {0}s")]
    SubscribeTimeout(u64),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Stream closed by server")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No traffic within keepalive deadline")]
    KeepaliveTimeout,

    #[error("{0} consecutive malformed frames")]
    TooManyDecodeErrors(u32),

    #[error("Vehicle unavailable: {0}")]
    VehicleUnavailable(VehicleStatus),
}

impl SessionError {
    /// Status published for the vehicle when the session ends with this error.
    pub fn vehicle_status(&self) -> VehicleStatus {
        match self {
            SessionError::Closed => VehicleStatus::Disconnected,
            SessionError::VehicleUnavailable(status) => *status,
            _ => VehicleStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_status() {
        assert_eq!(SessionError::Closed.vehicle_status(), VehicleStatus::Disconnected);
        assert_eq!(
            SessionError::KeepaliveTimeout.vehicle_status(),
            VehicleStatus::Error
        );
        assert_eq!(
            SessionError::VehicleUnavailable(VehicleStatus::VehicleOffline).vehicle_status(),
            VehicleStatus::VehicleOffline
        );
    }

    #[test]
    fn test_config_error_becomes_validation() {
        let err: BridgeError = ConfigError::NoVehicles.into();
        assert!(matches!(err, BridgeError::ConfigValidation(_)));
    }
}
