//! Per-vehicle sensor discovery.

use std::collections::HashSet;

use tesla_bridge_common::{TopicBuilder, VehicleIdentity};

/// Outcome of [`DiscoveryRegistry::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// True the first time the topic suffix is seen for this vehicle.
    pub is_new: bool,
}

/// Topic suffixes already seen for one vehicle.
///
/// One per vehicle, written only by that vehicle's current pipeline. It
/// survives pipeline restarts. The set only grows and is not persisted, so
/// each process start rediscovers every field once.
#[derive(Debug)]
pub struct DiscoveryRegistry {
    vehicle: VehicleIdentity,
    topics: TopicBuilder,
    seen: HashSet<String>,
}

impl DiscoveryRegistry {
    pub fn new(vehicle: VehicleIdentity, topics: TopicBuilder) -> Self {
        Self {
            vehicle,
            topics,
            seen: HashSet::new(),
        }
    }

    /// Record a topic suffix. Logs a discovery event the first time it is seen.
    pub fn observe(&mut self, field_name: &str, topic_suffix: &str) -> Observation {
        if self.seen.contains(topic_suffix) {
            return Observation { is_new: false };
        }

        self.seen.insert(topic_suffix.to_string());
        tracing::info!(
            car = self.vehicle.car_number,
            field = %field_name,
            topic = %self.topics.reading(self.vehicle.car_number, topic_suffix),
            "New sensor discovered"
        );

        Observation { is_new: true }
    }

    pub fn contains(&self, topic_suffix: &str) -> bool {
        self.seen.contains(topic_suffix)
    }

    /// Number of distinct fields seen.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn vehicle(&self) -> &VehicleIdentity {
        &self.vehicle
    }
}
