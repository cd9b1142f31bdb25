//! Decoding of streaming API text frames.
//!
//! Frame shapes:
//!
//! ```text
//! {"msg_type": "control:hello", ...}
//! {"data": [{"key": "InsideTemp", "value": {"doubleValue": 68.2}}, ...],
//!  "createdAt": "2024-05-01T10:00:00Z", "vin": "5YJ3..."}
//! {"error": {"type": "vehicle_offline", "message": "..."}}
//! ```

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use tesla_bridge_common::{Location, RawField, RawValue, VehicleIdentity, VehicleStatus};

use crate::error::FrameError;

/// Prefix the provider puts in front of gear positions ("ShiftStateD").
const SHIFT_STATE_PREFIX: &str = "ShiftState";

/// Field name used for the VIN carried at the top of data frames.
pub const VIN_FIELD: &str = "Vin";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Control message such as `control:hello`.
    Control(String),
    /// Telemetry fields, in frame order.
    Data(Vec<RawField>),
    /// Error reported by the provider.
    VehicleError { kind: String, message: String },
    /// Valid JSON with no meaning for the bridge.
    Ignored,
}

impl Frame {
    /// Vehicle status for provider errors that end the stream.
    pub fn unavailable_status(&self) -> Option<VehicleStatus> {
        match self {
            Frame::VehicleError { kind, .. } => match kind.as_str() {
                "vehicle_offline" => Some(VehicleStatus::VehicleOffline),
                "vehicle_disconnected" => Some(VehicleStatus::VehicleDisconnected),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Outcome of decoding one data item's value object.
#[derive(Debug, Clone, PartialEq)]
enum ItemValue {
    Value(RawValue),
    Invalid,
    Unknown,
}

/// Decode one text frame for `vehicle`. `received_at` stamps fields when the
/// frame carries no usable `createdAt`.
pub fn decode_frame(
    text: &str,
    vehicle: &VehicleIdentity,
    received_at: DateTime<Utc>,
) -> Result<Frame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(FrameError::NotAnObject);
    };

    if let Some(error) = object.get("error") {
        let kind = error
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("No details")
            .to_string();
        return Ok(Frame::VehicleError { kind, message });
    }

    if let Some(msg_type) = object.get("msg_type").and_then(Value::as_str)
        && msg_type.starts_with("control:")
    {
        return Ok(Frame::Control(msg_type.to_string()));
    }

    if let Some(Value::Array(items)) = object.get("data") {
        let observed_at = object
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        return Ok(Frame::Data(decode_items(
            items,
            &object,
            vehicle,
            observed_at,
        )));
    }

    tracing::debug!(car = vehicle.car_number, "Ignoring frame without data");
    Ok(Frame::Ignored)
}

fn decode_items(
    items: &[Value],
    object: &Map<String, Value>,
    vehicle: &VehicleIdentity,
    observed_at: DateTime<Utc>,
) -> Vec<RawField> {
    let mut fields = Vec::with_capacity(items.len() + 1);

    for item in items {
        let key = item.get("key").and_then(Value::as_str).map(str::trim);
        let (Some(key), Some(Value::Object(value))) = (key, item.get("value")) else {
            tracing::debug!(car = vehicle.car_number, "Skipping data item without key/value");
            continue;
        };
        if key.is_empty() {
            tracing::debug!(car = vehicle.car_number, "Skipping data item with empty key");
            continue;
        }

        match decode_value(value) {
            ItemValue::Value(raw) => {
                fields.push(RawField::new(vehicle.clone(), key, raw, observed_at));
            }
            ItemValue::Invalid => {
                tracing::debug!(car = vehicle.car_number, field = %key, "Field reported invalid");
            }
            ItemValue::Unknown => {
                let shown = Value::Object(value.clone());
                tracing::warn!(
                    car = vehicle.car_number,
                    field = %key,
                    value = %shown,
                    "Unknown value type"
                );
            }
        }
    }

    if let Some(vin) = object.get("vin").and_then(Value::as_str) {
        fields.push(RawField::new(vehicle.clone(), VIN_FIELD, vin, observed_at));
    }

    fields
}

fn decode_value(value: &Map<String, Value>) -> ItemValue {
    if value.get("invalid").and_then(Value::as_bool) == Some(true) {
        return ItemValue::Invalid;
    }

    if let Some(location) = value.get("locationValue") {
        let lat = location.get("latitude").and_then(Value::as_f64);
        let lon = location.get("longitude").and_then(Value::as_f64);
        return match (lat, lon) {
            (Some(latitude), Some(longitude)) => ItemValue::Value(RawValue::Location(Location {
                latitude,
                longitude,
            })),
            _ => ItemValue::Unknown,
        };
    }

    if let Some(shift) = value.get("shiftStateValue").and_then(Value::as_str) {
        let gear = shift.strip_prefix(SHIFT_STATE_PREFIX).unwrap_or(shift);
        return ItemValue::Value(RawValue::from(gear));
    }

    if let Some(text) = value.get("stringValue") {
        return match text {
            Value::String(s) => ItemValue::Value(RawValue::from(s.as_str())),
            Value::Number(n) => n
                .as_f64()
                .map_or(ItemValue::Unknown, |n| ItemValue::Value(RawValue::Number(n))),
            _ => ItemValue::Unknown,
        };
    }

    for key in ["doubleValue", "intValue", "numberValue"] {
        if let Some(number) = value.get(key) {
            return match number {
                Value::Number(n) => n
                    .as_f64()
                    .map_or(ItemValue::Unknown, |n| ItemValue::Value(RawValue::Number(n))),
                // 64-bit integers arrive as strings.
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_or(ItemValue::Unknown, |n| ItemValue::Value(RawValue::Number(n))),
                _ => ItemValue::Unknown,
            };
        }
    }

    if let Some(flag) = value.get("boolValue") {
        return match flag {
            Value::Bool(b) => ItemValue::Value(RawValue::Boolean(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => {
                ItemValue::Value(RawValue::Boolean(true))
            }
            Value::String(s) if s.eq_ignore_ascii_case("false") => {
                ItemValue::Value(RawValue::Boolean(false))
            }
            _ => ItemValue::Unknown,
        };
    }

    ItemValue::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vehicle() -> VehicleIdentity {
        VehicleIdentity::new("5YJ3E1EA7KF000001", 1)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn decode(text: &str) -> Result<Frame, FrameError> {
        decode_frame(text, &vehicle(), now())
    }

    fn data(text: &str) -> Vec<RawField> {
        match decode(text).unwrap() {
            Frame::Data(fields) => fields,
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    #[test]
    fn test_data_frame_values() {
        let fields = data(
            r#"{"data":[
                {"key":"InsideTemp","value":{"doubleValue":68.5}},
                {"key":"Odometer","value":{"intValue":"12345"}},
                {"key":"Gear","value":{"shiftStateValue":"ShiftStateD"}},
                {"key":"Locked","value":{"boolValue":true}},
                {"key":"Version","value":{"stringValue":"2024.14"}},
                {"key":"Location","value":{"locationValue":{"latitude":48.8,"longitude":2.3}}}
            ]}"#,
        );

        let values: Vec<_> = fields
            .iter()
            .map(|f| (f.field_name.as_str(), f.raw_value.clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("InsideTemp", RawValue::Number(68.5)),
                ("Odometer", RawValue::Number(12345.0)),
                ("Gear", RawValue::from("D")),
                ("Locked", RawValue::Boolean(true)),
                ("Version", RawValue::from("2024.14")),
                (
                    "Location",
                    RawValue::Location(Location {
                        latitude: 48.8,
                        longitude: 2.3
                    })
                ),
            ]
        );
        assert!(fields.iter().all(|f| f.observed_at == now()));
    }

    #[test]
    fn test_created_at_and_vin() {
        let fields = data(
            r#"{"data":[{"key":"Soc","value":{"numberValue":80}}],
                "createdAt":"2024-05-01T10:00:00Z","vin":"5YJ3E1EA7KF000001"}"#,
        );

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].field_name, VIN_FIELD);
        assert_eq!(fields[1].raw_value, RawValue::from("5YJ3E1EA7KF000001"));
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert!(fields.iter().all(|f| f.observed_at == expected));
    }

    #[test]
    fn test_bad_items_do_not_drop_frame() {
        let fields = data(
            r#"{"data":[
                {"key":"A","value":{"invalid":true}},
                {"key":"","value":{"intValue":1}},
                {"value":{"intValue":1}},
                {"key":"B","value":{"mysteryValue":[1,2]}},
                {"key":"C","value":{"doubleValue":1.5}}
            ]}"#,
        );

        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_name, "C");
    }

    #[test]
    fn test_control_frame() {
        assert_eq!(
            decode(r#"{"msg_type":"control:hello","connection_timeout":30000}"#).unwrap(),
            Frame::Control("control:hello".to_string())
        );
    }

    #[test]
    fn test_error_frame() {
        let frame = decode(r#"{"error":{"type":"vehicle_offline","message":"asleep"}}"#).unwrap();
        assert_eq!(frame.unavailable_status(), Some(VehicleStatus::VehicleOffline));

        let frame = decode(r#"{"error":{"type":"rate_limited"}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::VehicleError {
                kind: "rate_limited".to_string(),
                message: "No details".to_string()
            }
        );
        assert_eq!(frame.unavailable_status(), None);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode("not json"), Err(FrameError::InvalidJson(_))));
        assert_eq!(decode("[1,2,3]"), Err(FrameError::NotAnObject));
        assert_eq!(decode(r#"{"msg_type":"data:update"}"#), Ok(Frame::Ignored));
    }
}
