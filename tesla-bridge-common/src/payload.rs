use serde::Serialize;

use crate::error::Result;
use crate::telemetry::CanonicalValue;

/// Render a number the way automation consumers expect it: integral values
/// without a fractional part, everything else in shortest round-trip form.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Encode a reading value as an MQTT payload.
///
/// Scalars are plain text; locations are a small JSON object.
pub fn encode_value(value: &CanonicalValue) -> Result<Vec<u8>> {
    let text = match value {
        CanonicalValue::Number(n) => format_number(*n),
        CanonicalValue::Text(s) => s.clone(),
        CanonicalValue::Boolean(b) => b.to_string(),
        CanonicalValue::Location(location) => serde_json::to_string(location)?,
    };
    Ok(text.into_bytes())
}

/// Encode any serializable value as a JSON payload.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}
