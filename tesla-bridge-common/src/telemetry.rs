use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured vehicle: its provider identifier (usually the VIN) and the
/// small car number used in topic paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleIdentity {
    /// Opaque vehicle identifier.
    pub vin: String,

    /// Car number (1-based) used as a topic segment.
    pub car_number: u8,
}

impl VehicleIdentity {
    pub fn new(vin: impl Into<String>, car_number: u8) -> Self {
        Self {
            vin: vin.into(),
            car_number,
        }
    }
}

impl std::fmt::Display for VehicleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "car {}", self.car_number)
    }
}

/// Geographic position reported by location-class fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Value of a field as decoded from the stream, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Location(Location),
}

impl RawValue {
    /// Short name of the value kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Number(_) => "number",
            RawValue::Text(_) => "string",
            RawValue::Boolean(_) => "boolean",
            RawValue::Location(_) => "location",
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Number(v as f64)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Boolean(v)
    }
}

impl From<Location> for RawValue {
    fn from(v: Location) -> Self {
        RawValue::Location(v)
    }
}

/// One named field decoded from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    /// Field name as sent by the provider, e.g. "InsideTemp".
    pub field_name: String,

    /// The decoded value.
    pub raw_value: RawValue,

    /// Vehicle that reported the field.
    pub vehicle: VehicleIdentity,

    /// When the vehicle observed the value (or when it was received).
    pub observed_at: DateTime<Utc>,
}

impl RawField {
    pub fn new(
        vehicle: VehicleIdentity,
        field_name: impl Into<String>,
        raw_value: impl Into<RawValue>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            raw_value: raw_value.into(),
            vehicle,
            observed_at,
        }
    }
}

/// Normalized value handed to the bus publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Location(Location),
}

/// A normalized reading for one vehicle, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalReading {
    /// Final topic path segment, e.g. "inside_temp".
    pub topic_suffix: String,

    /// Converted value.
    pub value: CanonicalValue,

    /// Vehicle the reading belongs to.
    pub vehicle: VehicleIdentity,
}

/// Per-vehicle status published on `{prefix}/{car}/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    /// Stream is delivering data.
    Online,
    /// Session failed and is waiting to reconnect.
    Error,
    /// Stream closed or bridge shutting down.
    Disconnected,
    /// Provider reported the vehicle offline.
    VehicleOffline,
    /// Provider reported the vehicle disconnected.
    VehicleDisconnected,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Online => "online",
            VehicleStatus::Error => "error",
            VehicleStatus::Disconnected => "disconnected",
            VehicleStatus::VehicleOffline => "vehicle_offline",
            VehicleStatus::VehicleDisconnected => "vehicle_disconnected",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
