//! Tesla bridge configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tesla_bridge_common::{EnvVars, VehicleIdentity, env_bool, env_parse, env_string};
use tesla_bridge_framework::{BridgeConfig, LoggingConfig, MqttConfig, Result};

use crate::error::ConfigError;

/// Highest car number accepted (`VIN_CAR_1` .. `VIN_CAR_9`).
pub const MAX_CAR_NUMBER: u8 = 9;

/// Upper bound for every delay and timeout setting (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Default streaming endpoint.
pub const DEFAULT_STREAM_URI: &str = "wss://streaming.myteslamate.com/streaming/";

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeslaBridgeConfig {
    /// MQTT broker settings.
    pub mqtt: MqttConfig,

    /// Telemetry stream settings.
    pub stream: StreamConfig,

    /// Vehicles to bridge.
    pub vehicles: Vec<VehicleConfig>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Telemetry stream connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint.
    pub uri: String,

    /// Bearer credential sent with every subscription.
    #[serde(skip_serializing)]
    pub token: String,

    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,

    /// Subscribe by VIN (otherwise by car number).
    pub use_vin: bool,

    /// Constant delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,

    /// Interval between keepalive pings, in seconds.
    pub ping_interval_secs: u64,

    /// Extra time allowed for any traffic after a ping, in seconds.
    pub ping_timeout_secs: u64,

    /// Deadline for the websocket handshake, in seconds.
    pub connect_timeout_secs: u64,

    /// Deadline for the subscription acknowledgment, in seconds.
    pub subscribe_timeout_secs: u64,

    /// Consecutive malformed frames tolerated before reconnecting.
    pub max_decode_errors: u32,

    /// Depth of each vehicle's hand-off queue.
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_STREAM_URI.to_string(),
            token: String::new(),
            accept_invalid_certs: true,
            use_vin: true,
            reconnect_delay_secs: 5,
            ping_interval_secs: 10,
            ping_timeout_secs: 30,
            connect_timeout_secs: 10,
            subscribe_timeout_secs: 10,
            max_decode_errors: 10,
            queue_capacity: 1024,
        }
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("uri", &self.uri)
            .field("token", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("use_vin", &self.use_vin)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("ping_interval_secs", &self.ping_interval_secs)
            .field("ping_timeout_secs", &self.ping_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("subscribe_timeout_secs", &self.subscribe_timeout_secs)
            .field("max_decode_errors", &self.max_decode_errors)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }

    fn apply_env(&mut self, vars: &EnvVars) -> tesla_bridge_common::Result<()> {
        if let Some(token) = env_string(vars, "TESLA_API_TOKEN") {
            self.token = token;
        }
        if let Some(uri) = env_string(vars, "TESLA_WSS_URI") {
            self.uri = uri;
        }
        if let Some(accept) = env_bool(vars, "TESLA_WSS_TLS_ACCEPT_INVALID_CERTS")? {
            self.accept_invalid_certs = accept;
        }
        if let Some(use_vin) = env_bool(vars, "TESLA_WSS_USE_VIN")? {
            self.use_vin = use_vin;
        }
        if let Some(delay) = env_parse(vars, "RECONNECT_DELAY")? {
            self.reconnect_delay_secs = delay;
        }
        if let Some(interval) = env_parse(vars, "PING_INTERVAL")? {
            self.ping_interval_secs = interval;
        }
        if let Some(timeout) = env_parse(vars, "PING_TIMEOUT")? {
            self.ping_timeout_secs = timeout;
        }
        if let Some(timeout) = env_parse(vars, "CONNECT_TIMEOUT")? {
            self.connect_timeout_secs = timeout;
        }
        if let Some(timeout) = env_parse(vars, "SUBSCRIBE_TIMEOUT")? {
            self.subscribe_timeout_secs = timeout;
        }
        if let Some(max) = env_parse(vars, "MAX_DECODE_ERRORS")? {
            self.max_decode_errors = max;
        }
        if let Some(capacity) = env_parse(vars, "VEHICLE_QUEUE_CAPACITY")? {
            self.queue_capacity = capacity;
        }
        Ok(())
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let uri = self.uri.to_ascii_lowercase();
        let rest = uri
            .strip_prefix("wss://")
            .or_else(|| uri.strip_prefix("ws://"));
        if !rest.is_some_and(|host| !host.is_empty() && !host.starts_with('/')) {
            return Err(ConfigError::InvalidStreamUri(self.uri.clone()));
        }

        let positive = [
            ("RECONNECT_DELAY", self.reconnect_delay_secs),
            ("PING_INTERVAL", self.ping_interval_secs),
            ("PING_TIMEOUT", self.ping_timeout_secs),
            ("CONNECT_TIMEOUT", self.connect_timeout_secs),
            ("SUBSCRIBE_TIMEOUT", self.subscribe_timeout_secs),
            ("MAX_DECODE_ERRORS", u64::from(self.max_decode_errors)),
            ("VEHICLE_QUEUE_CAPACITY", self.queue_capacity as u64),
        ];
        if let Some(&(name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::NotPositive(name));
        }

        let durations = &positive[..5];
        if let Some(&(name, _)) = durations.iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            return Err(ConfigError::TooLong {
                setting: name,
                max: MAX_DURATION_SECS,
            });
        }

        Ok(())
    }
}

/// One configured vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleConfig {
    /// Vehicle identifier used for the subscription.
    pub vin: String,

    /// Car number used in topic paths.
    pub car_number: u8,
}

impl TeslaBridgeConfig {
    /// Identities of all configured vehicles, ordered by car number.
    pub fn identities(&self) -> Vec<VehicleIdentity> {
        let mut identities: Vec<_> = self
            .vehicles
            .iter()
            .map(|v| VehicleIdentity::new(&v.vin, v.car_number))
            .collect();
        identities.sort_by_key(|v| v.car_number);
        identities
    }

    fn validate_vehicles(&self) -> std::result::Result<(), ConfigError> {
        if self.vehicles.is_empty() {
            return Err(ConfigError::NoVehicles);
        }

        let mut seen = HashSet::new();
        for vehicle in &self.vehicles {
            if !(1..=MAX_CAR_NUMBER).contains(&vehicle.car_number) {
                return Err(ConfigError::CarNumberOutOfRange(vehicle.car_number));
            }
            if vehicle.vin.trim().is_empty() {
                return Err(ConfigError::EmptyVin(vehicle.car_number));
            }
            if !seen.insert(vehicle.car_number) {
                return Err(ConfigError::DuplicateCarNumber(vehicle.car_number));
            }
        }

        Ok(())
    }
}

/// Read `VIN_CAR_1` .. `VIN_CAR_9`.
fn vehicles_from_env(vars: &EnvVars) -> Vec<VehicleConfig> {
    (1..=MAX_CAR_NUMBER)
        .filter_map(|car_number| {
            env_string(vars, &format!("VIN_CAR_{}", car_number))
                .map(|vin| VehicleConfig { vin, car_number })
        })
        .collect()
}

impl BridgeConfig for TeslaBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn apply_env(&mut self, vars: &EnvVars) -> Result<()> {
        self.mqtt.apply_env(vars)?;
        self.stream.apply_env(vars)?;
        self.logging.apply_env(vars)?;

        let vehicles = vehicles_from_env(vars);
        if !vehicles.is_empty() {
            self.vehicles = vehicles;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;
        self.stream.validate()?;
        self.validate_vehicles()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesla_bridge_framework::BridgeError;

    fn vars(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TESLA_API_TOKEN", "secret"),
            ("VIN_CAR_1", "5YJ3E1EA7KF000001"),
        ]
    }

    #[test]
    fn test_defaults_from_minimal_env() {
        let config = TeslaBridgeConfig::from_sources(None, &vars(&minimal())).unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "myteslamate/cars");
        assert_eq!(config.stream.uri, DEFAULT_STREAM_URI);
        assert_eq!(config.stream.ping_interval(), Duration::from_secs(10));
        assert_eq!(config.stream.ping_timeout(), Duration::from_secs(30));
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(5));
        assert!(config.stream.use_vin);
        assert_eq!(
            config.identities(),
            vec![VehicleIdentity::new("5YJ3E1EA7KF000001", 1)]
        );
    }

    #[test]
    fn test_vehicles_keep_car_numbers() {
        let mut pairs = minimal();
        pairs.push(("VIN_CAR_3", "VIN3"));
        let config = TeslaBridgeConfig::from_sources(None, &vars(&pairs)).unwrap();

        let cars: Vec<u8> = config.identities().iter().map(|v| v.car_number).collect();
        assert_eq!(cars, vec![1, 3]);
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let result = TeslaBridgeConfig::from_sources(None, &vars(&[("VIN_CAR_1", "VIN1")]));
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_no_vehicles_is_fatal() {
        let result =
            TeslaBridgeConfig::from_sources(None, &vars(&[("TESLA_API_TOKEN", "secret")]));
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_unparsable_interval_is_fatal() {
        let mut pairs = minimal();
        pairs.push(("PING_INTERVAL", "soon"));
        let result = TeslaBridgeConfig::from_sources(None, &vars(&pairs));
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_zero_reconnect_delay_rejected() {
        let mut config = TeslaBridgeConfig::default();
        config.apply_env(&vars(&minimal())).unwrap();
        config.stream.reconnect_delay_secs = 0;

        assert_eq!(
            config.stream.validate(),
            Err(ConfigError::NotPositive("RECONNECT_DELAY"))
        );
    }

    #[test]
    fn test_oversized_timings_are_fatal() {
        for key in ["PING_INTERVAL", "PING_TIMEOUT", "SUBSCRIBE_TIMEOUT"] {
            let mut pairs = minimal();
            pairs.push((key, "18446744073709551615"));
            let result = TeslaBridgeConfig::from_sources(None, &vars(&pairs));
            assert!(
                matches!(result, Err(BridgeError::ConfigValidation(ref m)) if m.contains(key)),
                "{} accepted",
                key
            );
        }

        let mut config = TeslaBridgeConfig::default();
        config.apply_env(&vars(&minimal())).unwrap();
        config.stream.reconnect_delay_secs = MAX_DURATION_SECS;
        assert!(config.stream.validate().is_ok());
        config.stream.reconnect_delay_secs = MAX_DURATION_SECS + 1;
        assert_eq!(
            config.stream.validate(),
            Err(ConfigError::TooLong {
                setting: "RECONNECT_DELAY",
                max: MAX_DURATION_SECS
            })
        );
    }

    #[test]
    fn test_stream_uri_scheme() {
        let mut stream = StreamConfig {
            token: "secret".to_string(),
            ..Default::default()
        };
        assert!(stream.validate().is_ok());

        stream.uri = "ws://localhost:8080/streaming/".to_string();
        assert!(stream.validate().is_ok());

        stream.uri = "https://streaming.example.com/".to_string();
        assert!(matches!(
            stream.validate(),
            Err(ConfigError::InvalidStreamUri(_))
        ));
    }

    #[test]
    fn test_duplicate_car_numbers_rejected() {
        let config = TeslaBridgeConfig {
            vehicles: vec![
                VehicleConfig {
                    vin: "A".to_string(),
                    car_number: 2,
                },
                VehicleConfig {
                    vin: "B".to_string(),
                    car_number: 2,
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            config.validate_vehicles(),
            Err(ConfigError::DuplicateCarNumber(2))
        );
    }

    #[test]
    fn test_token_not_in_debug_output() {
        let stream = StreamConfig {
            token: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", stream).contains("super-secret"));
    }

    #[test]
    fn test_json5_file_with_env_overlay() {
        let content = r#"{
            mqtt: { host: "broker.lan" },
            stream: { token: "from-file", ping_interval_secs: 15 },
            vehicles: [{ vin: "FILEVIN", car_number: 2 }],
        }"#;
        let mut config: TeslaBridgeConfig = tesla_bridge_common::parse_config(content).unwrap();
        config.apply_env(&vars(&[("MQTT_PORT", "8883")])).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.stream.ping_interval_secs, 15);
        assert_eq!(config.stream.ping_timeout_secs, 30);
        assert_eq!(config.identities(), vec![VehicleIdentity::new("FILEVIN", 2)]);
    }
}
