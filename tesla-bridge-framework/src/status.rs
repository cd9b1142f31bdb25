//! Bridge status reporting.
//!
//! The bridge announces itself on `{prefix}/bridge/status` as a retained JSON
//! document. The same topic carries the broker-side last will, so subscribers
//! see `offline` even when the process dies without a clean shutdown.

use serde::{Deserialize, Serialize};

use tesla_bridge_common::{TopicBuilder, encode_json};

use crate::Result;
use crate::error::PublishError;
use crate::publisher::Publisher;

/// Bridge status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// Additional metadata (vehicle list, stream endpoint).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_state(bridge: impl Into<String>, version: impl Into<String>, status: &str) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "offline")
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Topic and payload for registering this status as the MQTT last will.
    pub fn as_last_will(&self, topics: &TopicBuilder) -> Result<(String, Vec<u8>)> {
        Ok((topics.bridge_status(), encode_json(self)?))
    }

    /// Publish this status, retained, to `{prefix}/bridge/status`.
    pub async fn publish(&self, publisher: &Publisher) -> std::result::Result<(), PublishError> {
        let topic = publisher.topics().bridge_status();
        publisher.publish_json(&topic, self, true).await
    }
}

/// Helper to publish bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Publisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(
        &self,
        metadata: Option<serde_json::Value>,
    ) -> std::result::Result<(), PublishError> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> std::result::Result<(), PublishError> {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("tesla", "0.3.0");
        assert_eq!(status.bridge, "tesla");
        assert_eq!(status.status, "running");
    }

    #[test]
    fn test_status_serialization() {
        let status = BridgeStatus::running("tesla", "1.0.0")
            .with_metadata(serde_json::json!({ "vehicles": [1, 2] }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"bridge\":\"tesla\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"vehicles\":[1,2]"));
    }

    #[test]
    fn test_last_will_topic() {
        let topics = TopicBuilder::new("myteslamate/cars");
        let (topic, payload) = BridgeStatus::offline("tesla", "1.0.0")
            .as_last_will(&topics)
            .unwrap();

        assert_eq!(topic, "myteslamate/cars/bridge/status");
        let decoded: BridgeStatus = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded.status, "offline");
    }
}
