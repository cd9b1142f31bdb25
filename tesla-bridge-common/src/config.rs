use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Flat key/value settings, as read from the process environment and `.env` files.
pub type EnvVars = HashMap<String, String>;

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker hostname or IP address.
    pub host: String,

    /// Broker TCP port.
    pub port: u16,

    /// Optional username (requires `password`).
    pub username: Option<String>,

    /// Optional password (requires `username`).
    pub password: Option<String>,

    /// Prefix for every published topic, e.g. "myteslamate/cars".
    pub topic_prefix: String,

    /// MQTT client identifier.
    pub client_id: String,

    /// Quality of service for readings: 0, 1 or 2.
    pub qos: u8,

    /// Whether readings are published with the retain flag.
    pub retain: bool,

    /// MQTT keep-alive in seconds.
    pub keep_alive_secs: u64,

    /// Delay before the event loop retries a failed broker connection.
    pub reconnect_delay_secs: u64,

    /// Hard deadline for handing a publish to the client queue.
    pub publish_timeout_ms: u64,

    /// Depth of the bounded publish queue shared by all vehicles.
    pub queue_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "myteslamate/cars".to_string(),
            client_id: "tesla-mqtt-bridge".to_string(),
            qos: 1,
            retain: false,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
            publish_timeout_ms: 5000,
            queue_capacity: 256,
        }
    }
}

impl MqttConfig {
    /// Overlay `MQTT_*` settings from environment-style key/value pairs.
    pub fn apply_env(&mut self, vars: &EnvVars) -> Result<()> {
        if let Some(host) = env_string(vars, "MQTT_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse(vars, "MQTT_PORT")? {
            self.port = port;
        }
        if let Some(user) = env_string(vars, "MQTT_USER") {
            self.username = Some(user);
        }
        if let Some(pass) = env_string(vars, "MQTT_PASS") {
            self.password = Some(pass);
        }
        if let Some(prefix) = env_string(vars, "MQTT_TOPIC_PREFIX") {
            self.topic_prefix = prefix;
        }
        if let Some(client_id) = env_string(vars, "MQTT_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Some(qos) = env_parse(vars, "MQTT_QOS")? {
            self.qos = qos;
        }
        if let Some(retain) = env_bool(vars, "MQTT_RETAIN")? {
            self.retain = retain;
        }
        if let Some(delay) = env_parse(vars, "MQTT_RECONNECT_DELAY")? {
            self.reconnect_delay_secs = delay;
        }
        if let Some(timeout) = env_parse(vars, "PUBLISH_TIMEOUT_MS")? {
            self.publish_timeout_ms = timeout;
        }
        if let Some(capacity) = env_parse(vars, "MQTT_QUEUE_CAPACITY")? {
            self.queue_capacity = capacity;
        }
        Ok(())
    }

    /// Check broker settings that would otherwise fail at connect time.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("MQTT host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("MQTT port cannot be 0".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "MQTT_USER and MQTT_PASS must be set together".to_string(),
            ));
        }
        let prefix = self.topic_prefix.trim_matches('/');
        if prefix.is_empty() || prefix.contains(['+', '#']) {
            return Err(Error::Config(format!(
                "Invalid MQTT topic prefix '{}'",
                self.topic_prefix
            )));
        }
        if self.qos > 2 {
            return Err(Error::Config(format!(
                "MQTT QoS must be 0, 1 or 2 (got {})",
                self.qos
            )));
        }
        if self.publish_timeout_ms == 0 || self.queue_capacity == 0 {
            return Err(Error::Config(
                "Publish timeout and queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Overlay `LOG_LEVEL` and `LOG_FORMAT`.
    pub fn apply_env(&mut self, vars: &EnvVars) -> Result<()> {
        if let Some(level) = env_string(vars, "LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = env_parse(vars, "LOG_FORMAT")? {
            self.format = format;
        }
        Ok(())
    }
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

/// Get a trimmed, non-empty setting.
pub fn env_string(vars: &EnvVars, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a setting with [`FromStr`]. Missing or empty keys yield `Ok(None)`.
pub fn env_parse<T>(vars: &EnvVars, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(vars, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::invalid_setting(key, raw, e)),
        None => Ok(None),
    }
}

/// Parse a boolean setting (`true/false`, `1/0`, `yes/no`, `on/off`).
pub fn env_bool(vars: &EnvVars, key: &str) -> Result<Option<bool>> {
    match env_string(vars, key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::invalid_setting(key, raw, "expected a boolean")),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_mqtt_defaults() {
        let config = MqttConfig::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic_prefix, "myteslamate/cars");
        assert_eq!(config.qos, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mqtt_env_overlay() {
        let mut config = MqttConfig::default();
        config
            .apply_env(&vars(&[
                ("MQTT_HOST", "broker.lan"),
                ("MQTT_PORT", "8883"),
                ("MQTT_USER", "bridge"),
                ("MQTT_PASS", "secret"),
                ("MQTT_TOPIC_PREFIX", "home/tesla"),
            ]))
            .unwrap();

        assert_eq!(config.host, "broker.lan");
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("bridge"));
        assert_eq!(config.topic_prefix, "home/tesla");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = MqttConfig::default();
        let err = config
            .apply_env(&vars(&[("MQTT_PORT", "not-a-port")]))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSetting { ref key, .. } if key == "MQTT_PORT"));
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let config = MqttConfig {
            username: Some("bridge".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_prefix_rejected() {
        let config = MqttConfig {
            topic_prefix: "cars/#".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_bool() {
        let v = vars(&[("A", "TRUE"), ("B", "0"), ("C", "maybe")]);
        assert_eq!(env_bool(&v, "A").unwrap(), Some(true));
        assert_eq!(env_bool(&v, "B").unwrap(), Some(false));
        assert!(env_bool(&v, "C").is_err());
        assert_eq!(env_bool(&v, "D").unwrap(), None);
    }

    #[test]
    fn test_parse_json5_mqtt_block() {
        let json5 = r#"
        {
            host: "10.0.0.5",
            topic_prefix: "garage/cars",
            qos: 0,
        }
        "#;

        let config: MqttConfig = parse_config(json5).unwrap();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 1883);
        assert_eq!(config.qos, 0);
    }

    #[test]
    fn test_logging_env_overlay() {
        let mut logging = LoggingConfig::default();
        logging
            .apply_env(&vars(&[("LOG_LEVEL", "debug"), ("LOG_FORMAT", "json")]))
            .unwrap();

        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Json);
    }
}
