//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;
use tesla_bridge_common::EnvVars;

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, MqttConfig};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// layered loading (defaults, JSON5 file, environment) and validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use tesla_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, MqttConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// #[serde(default)]
/// pub struct MyBridgeConfig {
///     pub mqtt: MqttConfig,
///     pub logging: LoggingConfig,
///     pub devices: Vec<String>,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn mqtt(&self) -> &MqttConfig {
///         &self.mqtt
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn apply_env(&mut self, vars: &EnvVars) -> Result<()> {
///         self.mqtt.apply_env(vars)?;
///         Ok(())
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.devices.is_empty() {
///             return Err(BridgeError::validation("At least one device required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned + Default {
    /// Get the MQTT broker configuration.
    fn mqtt(&self) -> &MqttConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the topic prefix for this bridge.
    fn topic_prefix(&self) -> &str {
        &self.mqtt().topic_prefix
    }

    /// Overlay environment-style key/value settings.
    fn apply_env(&mut self, vars: &EnvVars) -> Result<()>;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation,
    /// but keep the broker checks.
    fn validate(&self) -> Result<()> {
        self.mqtt().validate()?;
        Ok(())
    }

    /// Build the configuration from defaults, an optional JSON5 file and
    /// environment settings (in that order), then validate it.
    fn from_sources(path: Option<&Path>, vars: &EnvVars) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };

        config.apply_env(vars)?;
        config.validate()?;

        Ok(config)
    }

    #[doc(hidden)]
    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct TestConfig {
        mqtt: MqttConfig,
        logging: LoggingConfig,
        devices: Vec<String>,
    }

    impl BridgeConfig for TestConfig {
        fn mqtt(&self) -> &MqttConfig {
            &self.mqtt
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn apply_env(&mut self, vars: &EnvVars) -> Result<()> {
            self.mqtt.apply_env(vars)?;
            self.logging.apply_env(vars)?;
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result =
            TestConfig::from_sources(Some(Path::new("/nonexistent/path.json5")), &EnvVars::new());
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_from_env_only() {
        let vars: EnvVars = HashMap::from([
            ("MQTT_HOST".to_string(), "broker".to_string()),
            ("LOG_LEVEL".to_string(), "warn".to_string()),
        ]);

        let config = TestConfig::from_sources(None, &vars).unwrap();

        assert_eq!(config.mqtt.host, "broker");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.topic_prefix(), "myteslamate/cars");
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_invalid_env_is_fatal() {
        let vars: EnvVars = HashMap::from([("MQTT_QOS".to_string(), "7".to_string())]);

        let result = TestConfig::from_sources(None, &vars);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }
}
