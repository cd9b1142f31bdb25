/// Default topic prefix for all published readings.
pub const DEFAULT_TOPIC_PREFIX: &str = "myteslamate/cars";

/// Topic suffix carrying the per-vehicle status.
pub const STATE_SUFFIX: &str = "state";

/// Builder for the bridge's MQTT topics.
///
/// Topics follow the pattern:
/// `<prefix>/<car_number>/<topic_suffix>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    prefix: String,
}

impl TopicBuilder {
    /// Create a builder for a prefix. Leading and trailing slashes are dropped.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_string(),
        }
    }

    /// The normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the topic for one reading.
    ///
    /// # Example
    /// ```
    /// use tesla_bridge_common::topic::TopicBuilder;
    ///
    /// let builder = TopicBuilder::new("myteslamate/cars");
    /// assert_eq!(builder.reading(1, "inside_temp"), "myteslamate/cars/1/inside_temp");
    /// ```
    pub fn reading(&self, car_number: u8, topic_suffix: &str) -> String {
        format!("{}/{}/{}", self.prefix, car_number, topic_suffix)
    }

    /// Build the per-vehicle status topic.
    ///
    /// # Example
    /// ```
    /// use tesla_bridge_common::topic::TopicBuilder;
    ///
    /// let builder = TopicBuilder::new("myteslamate/cars");
    /// assert_eq!(builder.status(2), "myteslamate/cars/2/state");
    /// ```
    pub fn status(&self, car_number: u8) -> String {
        self.reading(car_number, STATE_SUFFIX)
    }

    /// Build the bridge status topic.
    ///
    /// # Example
    /// ```
    /// use tesla_bridge_common::topic::TopicBuilder;
    ///
    /// let builder = TopicBuilder::new("myteslamate/cars");
    /// assert_eq!(builder.bridge_status(), "myteslamate/cars/bridge/status");
    /// ```
    pub fn bridge_status(&self) -> String {
        format!("{}/bridge/status", self.prefix)
    }
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

/// Parse a reading topic back into car number and suffix.
///
/// Returns `None` if the topic is outside `prefix` or the car segment is not a number.
pub fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Option<ParsedTopic<'a>> {
    let prefix = prefix.trim_matches('/');
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (car, suffix) = rest.split_once('/')?;

    if suffix.is_empty() {
        return None;
    }

    Some(ParsedTopic {
        car_number: car.parse().ok()?,
        topic_suffix: suffix,
    })
}

/// Parsed components of a reading topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub car_number: u8,
    pub topic_suffix: &'a str,
}
