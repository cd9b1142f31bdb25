//! Field normalization: topic suffixes and imperial to metric conversion.
//!
//! Every field name resolves once to a [`FieldClass`] through a static table
//! of exact names and ordered name patterns. The class alone decides how the
//! value is converted; the topic suffix is always the snake-cased field name.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use tesla_bridge_common::topic::STATE_SUFFIX;
use tesla_bridge_common::{CanonicalReading, CanonicalValue, RawField, RawValue, VehicleIdentity};

use crate::error::MalformedFieldError;

/// Kilometres per mile.
pub const MILES_TO_KM: f64 = 1.60934;

/// Temperatures at or below this are assumed to already be Celsius.
pub const FAHRENHEIT_THRESHOLD: f64 = 50.0;

/// Conversion class of a telemetry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldClass {
    /// Miles, converted to kilometres.
    Distance,
    /// Miles per hour, converted to km/h.
    Speed,
    /// Fahrenheit, converted to Celsius above [`FAHRENHEIT_THRESHOLD`].
    Temperature,
    /// Latitude/longitude pair.
    Location,
    /// Published unchanged.
    PassThrough,
}

impl std::fmt::Display for FieldClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldClass::Distance => "distance",
            FieldClass::Speed => "speed",
            FieldClass::Temperature => "temperature",
            FieldClass::Location => "location",
            FieldClass::PassThrough => "pass-through",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum NamePattern {
    Contains(&'static str),
    EndsWith(&'static str),
}

impl NamePattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Contains(part) => name.contains(part),
            NamePattern::EndsWith(suffix) => name.ends_with(suffix),
        }
    }
}

struct Classifier {
    exact: HashMap<&'static str, FieldClass>,
    patterns: Vec<(NamePattern, FieldClass)>,
}

impl Classifier {
    fn builtin() -> Self {
        use FieldClass::*;

        let exact = HashMap::from([
            ("EstBatteryRange", Distance),
            ("IdealBatteryRange", Distance),
            ("RatedRange", Distance),
            ("RangeDisplay", Distance),
            ("MilesToArrival", Distance),
            ("MilesRemaining", Distance),
            ("Odometer", Distance),
            ("ChargeRateMilePerHour", Distance),
            ("DistanceToArrival", Distance),
            ("VehicleSpeed", Speed),
            ("CruiseSetSpeed", Speed),
            ("CurrentLimitMph", Speed),
            ("SpeedLimit", Speed),
            ("SpeedLimitDisplay", Speed),
            // A mode flag, not a speed.
            ("SpeedLimitMode", PassThrough),
            ("InsideTemp", Temperature),
            ("OutsideTemp", Temperature),
            ("Location", Location),
            ("DestinationLocation", Location),
            ("OriginLocation", Location),
        ]);

        // First match wins.
        let patterns = vec![
            (NamePattern::Contains("Miles"), Distance),
            (NamePattern::Contains("Odometer"), Distance),
            (NamePattern::Contains("Mph"), Speed),
            (NamePattern::Contains("Fahrenheit"), Temperature),
            (NamePattern::EndsWith("Location"), Location),
        ];

        Self { exact, patterns }
    }

    fn classify(&self, field_name: &str) -> FieldClass {
        if let Some(class) = self.exact.get(field_name) {
            return *class;
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.matches(field_name))
            .map(|(_, class)| *class)
            .unwrap_or(FieldClass::PassThrough)
    }
}

static CLASSIFIER: Lazy<Classifier> = Lazy::new(Classifier::builtin);

static ACRONYM_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z][A-Z]+)([A-Z][a-z])").unwrap());
static WORD_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// Resolve the conversion class of a field name.
pub fn classify(field_name: &str) -> FieldClass {
    CLASSIFIER.classify(field_name)
}

/// Convert a CamelCase field name into its topic suffix.
///
/// ```
/// use tesla_mqtt_bridge::normalizer::to_topic_suffix;
///
/// assert_eq!(to_topic_suffix("InsideTemp"), "inside_temp");
/// assert_eq!(to_topic_suffix("ACChargingPower"), "ac_charging_power");
/// ```
pub fn to_topic_suffix(field_name: &str) -> String {
    let split_acronyms = ACRONYM_BOUNDARY.replace_all(field_name, "${1}_${2}");
    WORD_BOUNDARY
        .replace_all(&split_acronyms, "${1}_${2}")
        .to_lowercase()
}

/// Round to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Result of normalizing one field.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedField {
    pub class: FieldClass,
    pub topic_suffix: String,
    pub value: CanonicalValue,
}

impl NormalizedField {
    /// Whether the value was published without conversion.
    pub fn is_pass_through(&self) -> bool {
        self.class == FieldClass::PassThrough
    }

    pub fn into_reading(self, vehicle: VehicleIdentity) -> CanonicalReading {
        CanonicalReading {
            topic_suffix: self.topic_suffix,
            value: self.value,
            vehicle,
        }
    }
}

/// Normalize one field. Pure: the same input always gives the same output.
pub fn normalize(
    field_name: &str,
    raw_value: &RawValue,
) -> Result<NormalizedField, MalformedFieldError> {
    let topic_suffix = to_topic_suffix(field_name);
    if topic_suffix.is_empty()
        || topic_suffix.contains(['/', '+', '#'])
        || topic_suffix.contains(char::is_whitespace)
    {
        return Err(MalformedFieldError::new(
            field_name,
            "name cannot be used as a topic segment",
        ));
    }
    // `{prefix}/{car}/state` carries the vehicle status.
    if topic_suffix == STATE_SUFFIX {
        return Err(MalformedFieldError::new(
            field_name,
            "name collides with the vehicle status topic",
        ));
    }

    let class = classify(field_name);
    let value = match class {
        FieldClass::Distance | FieldClass::Speed => {
            let imperial = numeric(field_name, class, raw_value)?;
            CanonicalValue::Number(round1(imperial * MILES_TO_KM))
        }
        FieldClass::Temperature => {
            let degrees = numeric(field_name, class, raw_value)?;
            if degrees > FAHRENHEIT_THRESHOLD {
                CanonicalValue::Number(round1((degrees - 32.0) * 5.0 / 9.0))
            } else {
                CanonicalValue::Number(degrees)
            }
        }
        FieldClass::Location => match raw_value {
            RawValue::Location(location)
                if (-90.0..=90.0).contains(&location.latitude)
                    && (-180.0..=180.0).contains(&location.longitude) =>
            {
                CanonicalValue::Location(*location)
            }
            RawValue::Location(_) => {
                return Err(MalformedFieldError::new(
                    field_name,
                    "coordinates out of range",
                ));
            }
            other => {
                return Err(MalformedFieldError::new(
                    field_name,
                    format!("expected a location, got {}", other.kind()),
                ));
            }
        },
        FieldClass::PassThrough => match raw_value {
            RawValue::Number(n) if !n.is_finite() => {
                return Err(MalformedFieldError::new(field_name, "number is not finite"));
            }
            RawValue::Number(n) => CanonicalValue::Number(*n),
            RawValue::Text(s) => CanonicalValue::Text(s.clone()),
            RawValue::Boolean(b) => CanonicalValue::Boolean(*b),
            RawValue::Location(l) => CanonicalValue::Location(*l),
        },
    };

    Ok(NormalizedField {
        class,
        topic_suffix,
        value,
    })
}

/// Normalize a decoded field into a reading for its vehicle.
pub fn normalize_field(field: &RawField) -> Result<CanonicalReading, MalformedFieldError> {
    normalize(&field.field_name, &field.raw_value)
        .map(|normalized| normalized.into_reading(field.vehicle.clone()))
}

/// Numeric value of a field whose class requires one. Numeric strings are accepted.
fn numeric(
    field_name: &str,
    class: FieldClass,
    raw_value: &RawValue,
) -> Result<f64, MalformedFieldError> {
    let value = match raw_value {
        RawValue::Number(n) => *n,
        RawValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            MalformedFieldError::new(
                field_name,
                format!("expected a number for {} field, got '{}'", class, s),
            )
        })?,
        other => {
            return Err(MalformedFieldError::new(
                field_name,
                format!("expected a number for {} field, got {}", class, other.kind()),
            ));
        }
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(MalformedFieldError::new(field_name, "number is not finite"))
    }
}
