//! Vehicle stream session: one persistent stream per vehicle.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated -> Streaming
//!                    ^   |            |              |
//!                    |   v            v              v
//!                    +-------------- Backoff <-------+
//! ```
//!
//! `Connecting` opens the transport and sends the subscription,
//! `Authenticated` waits for the first response, `Streaming` forwards decoded
//! fields and runs the keepalive. Any failure lands in `Backoff`, which waits
//! the constant reconnect delay. Shutdown, or losing the vehicle pipeline,
//! leads back to `Disconnected` and ends the session.

pub mod keepalive;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use tesla_bridge_common::{RawField, VehicleIdentity, VehicleStatus};

use crate::config::StreamConfig;
use crate::error::{FrameError, SessionError};
use crate::frame::{Frame, decode_frame};

pub use keepalive::Keepalive;
pub use transport::{
    Inbound, StreamConnection, StreamTransport, WebSocketConnection, WebSocketTransport,
};

/// How long a closing handshake may take before the connection is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a vehicle session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    Streaming,
    Backoff,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticated)
                | (Connecting, Backoff)
                | (Authenticated, Streaming)
                | (Authenticated, Backoff)
                | (Streaming, Backoff)
                | (Backoff, Connecting)
                | (_, Disconnected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Streaming => "streaming",
            SessionState::Backoff => "backoff",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item handed from a session to its vehicle pipeline, in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Field(RawField),
    Status(VehicleStatus),
}

/// Session timing and subscription settings, shared by all vehicles.
#[derive(Clone)]
pub struct SessionSettings {
    pub token: String,
    pub use_vin: bool,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub max_decode_errors: u32,
}

impl From<&StreamConfig> for SessionSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            token: config.token.clone(),
            use_vin: config.use_vin,
            reconnect_delay: config.reconnect_delay(),
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            connect_timeout: config.connect_timeout(),
            subscribe_timeout: config.subscribe_timeout(),
            max_decode_errors: config.max_decode_errors,
        }
    }
}

impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("token", &"<redacted>")
            .field("use_vin", &self.use_vin)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("subscribe_timeout", &self.subscribe_timeout)
            .field("max_decode_errors", &self.max_decode_errors)
            .finish()
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The vehicle pipeline stopped consuming events.
    PipelineClosed,
}

/// Why a connection attempt ended.
enum Exit {
    Shutdown,
    PipelineClosed,
    Failed(SessionError),
}

/// Per-connection progress.
struct Progress {
    streaming: bool,
    decode_errors: u32,
    keepalive: Keepalive,
}

/// Resolves once shutdown is requested or the shutdown sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Stream session for one vehicle.
pub struct VehicleSession<T: StreamTransport> {
    vehicle: VehicleIdentity,
    transport: T,
    settings: Arc<SessionSettings>,
    events: mpsc::Sender<SessionEvent>,
    state: Arc<watch::Sender<SessionState>>,
}

impl<T: StreamTransport> VehicleSession<T> {
    pub fn new(
        vehicle: VehicleIdentity,
        transport: T,
        settings: Arc<SessionSettings>,
        events: mpsc::Sender<SessionEvent>,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        Self {
            vehicle,
            transport,
            settings,
            events,
            state,
        }
    }

    pub fn vehicle(&self) -> &VehicleIdentity {
        &self.vehicle
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                car = self.vehicle.car_number,
                from = %current,
                to = %next,
                "Unexpected session transition"
            );
        }
        self.state.send_replace(next);
        tracing::info!(
            car = self.vehicle.car_number,
            from = %current,
            to = %next,
            "Session state changed"
        );
    }

    /// Hand an event to the pipeline. Returns false once the pipeline is gone.
    async fn emit(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Run until shutdown or until the pipeline goes away, reconnecting
    /// after every failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SessionEnd {
        let end = loop {
            if *shutdown.borrow() {
                break SessionEnd::Shutdown;
            }

            self.transition(SessionState::Connecting);
            let error = match self.attempt(&mut shutdown).await {
                Exit::Shutdown => break SessionEnd::Shutdown,
                Exit::PipelineClosed => break SessionEnd::PipelineClosed,
                Exit::Failed(error) => error,
            };

            self.transition(SessionState::Backoff);
            tracing::warn!(
                car = self.vehicle.car_number,
                error = %error,
                delay_secs = self.settings.reconnect_delay.as_secs(),
                "Stream session failed, reconnecting"
            );
            if !self.emit(SessionEvent::Status(error.vehicle_status())).await {
                break SessionEnd::PipelineClosed;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = self.events.closed() => break SessionEnd::PipelineClosed,
                _ = shutdown_requested(&mut shutdown) => break SessionEnd::Shutdown,
            }
        };

        self.transition(SessionState::Disconnected);
        match end {
            SessionEnd::Shutdown => {
                self.emit(SessionEvent::Status(VehicleStatus::Disconnected)).await;
                tracing::info!(car = self.vehicle.car_number, "Stream session stopped");
            }
            SessionEnd::PipelineClosed => {
                tracing::warn!(
                    car = self.vehicle.car_number,
                    "Vehicle pipeline gone, stopping stream session"
                );
            }
        }
        end
    }

    /// One connection lifetime: connect, subscribe, stream.
    async fn attempt(&self, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let connect = tokio::time::timeout(
            self.settings.connect_timeout,
            self.transport.connect(&self.vehicle),
        );

        let mut connection = tokio::select! {
            result = connect => match result {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => return Exit::Failed(e),
                Err(_) => {
                    return Exit::Failed(SessionError::ConnectTimeout(
                        self.settings.connect_timeout.as_secs(),
                    ));
                }
            },
            _ = self.events.closed() => return Exit::PipelineClosed,
            _ = shutdown_requested(shutdown) => return Exit::Shutdown,
        };

        let exit = self.stream(&mut connection, shutdown).await;

        if tokio::time::timeout(CLOSE_TIMEOUT, connection.close())
            .await
            .is_err()
        {
            tracing::debug!(car = self.vehicle.car_number, "Close timed out, dropping connection");
        }
        drop(connection);

        exit
    }

    async fn stream(
        &self,
        connection: &mut T::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let tag = if self.settings.use_vin {
            self.vehicle.vin.clone()
        } else {
            self.vehicle.car_number.to_string()
        };
        let request = serde_json::json!({
            "msg_type": "data:subscribe_all",
            "tag": tag,
            "token": self.settings.token,
        });

        tracing::info!(car = self.vehicle.car_number, tag = %tag, "Subscribing to vehicle data");
        if let Err(e) = connection.send_text(request.to_string()).await {
            return Exit::Failed(e);
        }
        self.transition(SessionState::Authenticated);

        let now = Instant::now();
        let subscribe_deadline = now + self.settings.subscribe_timeout;
        let mut progress = Progress {
            streaming: false,
            decode_errors: 0,
            keepalive: Keepalive::new(self.settings.ping_interval, self.settings.ping_timeout, now),
        };

        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => return Exit::Shutdown,
                _ = self.events.closed() => return Exit::PipelineClosed,
                _ = sleep_until(subscribe_deadline), if !progress.streaming => {
                    return Exit::Failed(SessionError::SubscribeTimeout(
                        self.settings.subscribe_timeout.as_secs(),
                    ));
                }
                _ = sleep_until(progress.keepalive.deadline()), if progress.streaming => {
                    return Exit::Failed(SessionError::KeepaliveTimeout);
                }
                _ = sleep_until(progress.keepalive.next_ping()), if progress.streaming => {
                    if let Err(e) = connection.send_ping().await {
                        return Exit::Failed(e);
                    }
                    progress.keepalive.ping_sent(Instant::now());
                }
                message = connection.recv() => {
                    let inbound = match message {
                        Some(Ok(inbound)) => inbound,
                        Some(Err(e)) => return Exit::Failed(e),
                        None => return Exit::Failed(SessionError::Closed),
                    };
                    progress.keepalive.record_traffic(Instant::now());

                    if let Some(exit) = self.handle(inbound, &mut progress).await {
                        return exit;
                    }
                }
            }
        }
    }

    async fn handle(&self, inbound: Inbound, progress: &mut Progress) -> Option<Exit> {
        match inbound {
            Inbound::Text(text) => match decode_frame(&text, &self.vehicle, Utc::now()) {
                Ok(frame) => {
                    progress.decode_errors = 0;
                    self.handle_frame(frame, progress).await
                }
                Err(e) => self.malformed(e, progress),
            },
            Inbound::Binary(len) => self.malformed(FrameError::Binary(len), progress),
            Inbound::Ping | Inbound::Pong => None,
            Inbound::Close => Some(Exit::Failed(SessionError::Closed)),
        }
    }

    fn malformed(&self, error: FrameError, progress: &mut Progress) -> Option<Exit> {
        progress.decode_errors += 1;
        tracing::warn!(
            car = self.vehicle.car_number,
            error = %error,
            consecutive = progress.decode_errors,
            "Skipping malformed frame"
        );

        (progress.decode_errors > self.settings.max_decode_errors).then(|| {
            Exit::Failed(SessionError::TooManyDecodeErrors(progress.decode_errors))
        })
    }

    async fn handle_frame(&self, frame: Frame, progress: &mut Progress) -> Option<Exit> {
        if let Some(status) = frame.unavailable_status() {
            return Some(Exit::Failed(SessionError::VehicleUnavailable(status)));
        }

        match frame {
            Frame::VehicleError { kind, message } => {
                if !progress.streaming {
                    return Some(Exit::Failed(SessionError::Rejected(format!(
                        "{}: {}",
                        kind, message
                    ))));
                }
                tracing::warn!(
                    car = self.vehicle.car_number,
                    kind = %kind,
                    message = %message,
                    "Provider reported an error"
                );
                None
            }
            Frame::Control(kind) => {
                tracing::debug!(car = self.vehicle.car_number, kind = %kind, "Control frame");
                let was_streaming = progress.streaming;
                if !self.mark_streaming(progress).await {
                    return Some(Exit::PipelineClosed);
                }
                if was_streaming && !self.emit(SessionEvent::Status(VehicleStatus::Online)).await {
                    return Some(Exit::PipelineClosed);
                }
                None
            }
            Frame::Data(fields) => {
                if !self.mark_streaming(progress).await {
                    return Some(Exit::PipelineClosed);
                }
                for field in fields {
                    if !self.emit(SessionEvent::Field(field)).await {
                        return Some(Exit::PipelineClosed);
                    }
                }
                None
            }
            Frame::Ignored => {
                (!self.mark_streaming(progress).await).then_some(Exit::PipelineClosed)
            }
        }
    }

    /// Enter `Streaming` on the first non-error response. Returns false once
    /// the pipeline is gone.
    async fn mark_streaming(&self, progress: &mut Progress) -> bool {
        if progress.streaming {
            return true;
        }

        progress.streaming = true;
        progress.keepalive = Keepalive::new(
            self.settings.ping_interval,
            self.settings.ping_timeout,
            Instant::now(),
        );
        self.transition(SessionState::Streaming);
        self.emit(SessionEvent::Status(VehicleStatus::Online)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use SessionState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Backoff));
        assert!(Backoff.can_transition_to(Connecting));
        assert!(Streaming.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Streaming));
        assert!(!Backoff.can_transition_to(Streaming));
        assert!(!Streaming.can_transition_to(Connecting));
    }

    #[test]
    fn test_settings_from_config() {
        let config = StreamConfig {
            token: "secret".to_string(),
            ping_interval_secs: 7,
            ..Default::default()
        };
        let settings = SessionSettings::from(&config);

        assert_eq!(settings.ping_interval, Duration::from_secs(7));
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert!(!format!("{:?}", settings).contains("secret"));
    }
}
