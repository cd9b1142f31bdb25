//! Bridge from the Tesla telemetry streaming API to MQTT.
//!
//! One websocket stream is kept per configured vehicle. Every field of every
//! data frame is normalized (imperial units converted to metric) and
//! published to its own topic.
//!
//! # Topic Format
//!
//! ```text
//! {prefix}/{car_number}/{topic_suffix}
//! {prefix}/{car_number}/state
//! {prefix}/bridge/status
//! ```
//!
//! For example:
//! ```text
//! myteslamate/cars/1/inside_temp      20.5
//! myteslamate/cars/1/odometer         16093.4
//! myteslamate/cars/1/location         {"latitude":48.85,"longitude":2.35}
//! myteslamate/cars/1/state            online
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod mock;
pub mod normalizer;
pub mod session;
pub mod supervisor;

pub use config::{StreamConfig, TeslaBridgeConfig, VehicleConfig};
pub use discovery::{DiscoveryRegistry, Observation};
pub use error::{ConfigError, FrameError, MalformedFieldError, SessionError};
pub use normalizer::{FieldClass, NormalizedField, normalize, normalize_field, to_topic_suffix};
pub use session::{SessionEnd, SessionEvent, SessionSettings, SessionState, VehicleSession};
pub use supervisor::{SharedRegistry, Supervisor, SupervisorHandle, run_pipeline};
