//! Telemetry publisher for the MQTT broker.
//!
//! One [`Publisher`] (cheap to clone) is shared by every vehicle. All clones
//! feed the same bounded request queue of a single MQTT connection, which is
//! driven by the [`BusConnection`] event loop task. The event loop owns
//! reconnects; vehicle sessions never see them.

use std::future::Future;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use tokio::sync::watch;

use tesla_bridge_common::{
    CanonicalReading, MqttConfig, TopicBuilder, VehicleIdentity, VehicleStatus, encode_json,
    encode_value,
};

use crate::error::{BridgeError, PublishError, Result};

/// Connection state of the shared broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Waiting for the first CONNACK.
    Connecting,
    /// Broker accepted the connection.
    Connected,
    /// Connection lost; the event loop is retrying.
    Disconnected,
    /// Broker rejected the connection for a reason retrying cannot fix.
    Failed,
}

/// Destination for normalized readings and vehicle status updates.
///
/// Implemented by [`Publisher`]; tests substitute an in-memory recorder.
pub trait ReadingSink: Clone + Send + Sync + 'static {
    /// Publish one reading to `{prefix}/{car_number}/{topic_suffix}`.
    fn publish(
        &self,
        reading: &CanonicalReading,
    ) -> impl Future<Output = std::result::Result<(), PublishError>> + Send;

    /// Publish a vehicle status to `{prefix}/{car_number}/state`.
    fn publish_status(
        &self,
        vehicle: &VehicleIdentity,
        status: VehicleStatus,
    ) -> impl Future<Output = std::result::Result<(), PublishError>> + Send;
}

/// Publisher for sending telemetry to the MQTT broker.
#[derive(Clone, Debug)]
pub struct Publisher {
    client: AsyncClient,
    topics: TopicBuilder,
    qos: QoS,
    retain: bool,
    publish_timeout: Duration,
    state: watch::Receiver<BusState>,
}

/// The MQTT event loop backing a [`Publisher`].
///
/// Must be driven with [`BusConnection::run`] for any publish to reach the broker.
pub struct BusConnection {
    eventloop: EventLoop,
    state: watch::Sender<BusState>,
    reconnect_delay: Duration,
}

/// Map a configured QoS level to the client's enum.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::validation(format!(
            "MQTT QoS must be 0, 1 or 2 (got {})",
            other
        ))),
    }
}

impl Publisher {
    /// Create the publisher and its (not yet running) connection.
    ///
    /// `last_will` is a `(topic, payload)` pair the broker publishes, retained,
    /// if the bridge disappears without disconnecting.
    pub fn connect(
        config: &MqttConfig,
        last_will: Option<(String, Vec<u8>)>,
    ) -> Result<(Self, BusConnection)> {
        let qos = qos_from_level(config.qos)?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        if let Some((topic, payload)) = last_will {
            options.set_last_will(LastWill::new(topic, payload, QoS::AtLeastOnce, true));
        }

        let (client, eventloop) = AsyncClient::new(options, config.queue_capacity);
        let (state_tx, state_rx) = watch::channel(BusState::Connecting);

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to MQTT broker"
        );

        let publisher = Self {
            client,
            topics: TopicBuilder::new(&config.topic_prefix),
            qos,
            retain: config.retain,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            state: state_rx,
        };

        let connection = BusConnection {
            eventloop,
            state: state_tx,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs.max(1)),
        };

        Ok((publisher, connection))
    }

    /// Get the topic builder.
    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Current broker connection state.
    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    /// Watch the broker connection state.
    pub fn state_watch(&self) -> watch::Receiver<BusState> {
        self.state.clone()
    }

    /// Publish raw bytes to a full topic.
    ///
    /// Queues the message for the event loop; the client retransmits QoS 1/2
    /// messages across reconnects. Fails fast once the connection is in
    /// terminal failure, and gives up after the configured publish timeout.
    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> std::result::Result<(), PublishError> {
        if self.state() == BusState::Failed {
            return Err(PublishError::Terminal(
                "broker rejected the connection".to_string(),
            ));
        }

        match tokio::time::timeout(
            self.publish_timeout,
            self.client.publish(topic, self.qos, retain, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Client {
                topic: topic.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                timeout_ms: self.publish_timeout.as_millis() as u64,
            }),
        }
    }

    /// Publish a JSON value to a full topic.
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> std::result::Result<(), PublishError> {
        let payload = encode_json(value).map_err(|e| PublishError::Encode {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        self.publish_raw(topic, payload, retain).await
    }

    /// Ask the event loop to send DISCONNECT and stop.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request not delivered");
        }
    }
}

impl ReadingSink for Publisher {
    async fn publish(&self, reading: &CanonicalReading) -> std::result::Result<(), PublishError> {
        let topic = self
            .topics
            .reading(reading.vehicle.car_number, &reading.topic_suffix);
        let payload = encode_value(&reading.value).map_err(|e| PublishError::Encode {
            topic: topic.clone(),
            message: e.to_string(),
        })?;

        self.publish_raw(&topic, payload, self.retain).await?;
        tracing::trace!(topic = %topic, "Published reading");
        Ok(())
    }

    async fn publish_status(
        &self,
        vehicle: &VehicleIdentity,
        status: VehicleStatus,
    ) -> std::result::Result<(), PublishError> {
        let topic = self.topics.status(vehicle.car_number);
        self.publish_raw(&topic, status.as_str().as_bytes().to_vec(), true).await
    }
}

impl BusConnection {
    /// Drive the MQTT connection until DISCONNECT is sent, the broker rejects
    /// us permanently, or shutdown is signalled while waiting to reconnect.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!(
                        session_present = ack.session_present,
                        "Connected to MQTT broker"
                    );
                    self.state.send_replace(BusState::Connected);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::info!("Disconnected from MQTT broker cleanly");
                    self.state.send_replace(BusState::Disconnected);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(reason) = terminal_reason(&e) {
                        tracing::error!(error = %e, "MQTT broker rejected connection: {}", reason);
                        self.state.send_replace(BusState::Failed);
                        return Err(BridgeError::MqttConnection(format!("{}: {}", reason, e)));
                    }

                    tracing::warn!(
                        error = %e,
                        delay_secs = self.reconnect_delay.as_secs(),
                        "MQTT connection lost, reconnecting"
                    );
                    self.state.send_replace(BusState::Disconnected);

                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => {
                            tracing::debug!("Shutdown while waiting to reconnect to MQTT broker");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: BusState) {
        self.state.send_replace(state);
    }
}

/// Classify connection errors that retrying cannot fix.
fn terminal_reason(error: &ConnectionError) -> Option<&'static str> {
    match error {
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::BadUserNamePassword => Some("bad username or password"),
            ConnectReturnCode::NotAuthorized => Some("not authorized"),
            ConnectReturnCode::BadClientId => Some("client id rejected"),
            ConnectReturnCode::RefusedProtocolVersion => Some("protocol version refused"),
            _ => None,
        },
        _ => None,
    }
}

/// Statistics from a run of publish calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully published readings.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesla_bridge_common::CanonicalValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const WAIT: Duration = Duration::from_secs(10);

    fn config() -> MqttConfig {
        MqttConfig {
            publish_timeout_ms: 100,
            queue_capacity: 1,
            ..Default::default()
        }
    }

    fn local_config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            reconnect_delay_secs: 1,
            ..config()
        }
    }

    /// Accept one client, read its CONNECT and answer with `return_code`.
    async fn answer_connect(listener: &TcpListener, return_code: u8) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut connect = [0u8; 256];
        socket.read(&mut connect).await.unwrap();
        socket
            .write_all(&[0x20, 0x02, 0x00, return_code])
            .await
            .unwrap();
        socket
    }

    async fn wait_for_bus(state: &mut watch::Receiver<BusState>, expected: BusState) {
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == expected))
            .await
            .expect("bus state reached in time")
            .expect("bus state sender alive");
    }

    fn reading(suffix: &str) -> CanonicalReading {
        CanonicalReading {
            topic_suffix: suffix.to_string(),
            value: CanonicalValue::Number(20.0),
            vehicle: VehicleIdentity::new("VIN1", 1),
        }
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[test]
    fn test_terminal_reasons() {
        let bad_creds = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert!(terminal_reason(&bad_creds).is_some());

        let unavailable = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);
        assert!(terminal_reason(&unavailable).is_none());
    }

    #[tokio::test]
    async fn test_publish_is_queued_without_broker() {
        let (publisher, _connection) = Publisher::connect(&config(), None).unwrap();

        assert_eq!(publisher.state(), BusState::Connecting);
        assert!(publisher.publish(&reading("inside_temp")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_times_out_when_queue_is_full() {
        let (publisher, _connection) = Publisher::connect(&config(), None).unwrap();

        // Capacity 1 and nobody polls the event loop.
        publisher.publish(&reading("a")).await.unwrap();
        let err = publisher.publish(&reading("b")).await.unwrap_err();

        assert_eq!(
            err,
            PublishError::Timeout {
                topic: "myteslamate/cars/1/b".to_string(),
                timeout_ms: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_terminal_state_fails_fast() {
        let (publisher, connection) = Publisher::connect(&config(), None).unwrap();
        connection.set_state(BusState::Failed);

        let err = publisher.publish(&reading("odometer")).await.unwrap_err();
        assert!(matches!(err, PublishError::Terminal(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rejected_credentials_end_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (publisher, connection) = Publisher::connect(&local_config(port), None).unwrap();
        let (_stop, shutdown) = watch::channel(false);

        // Return code 4: bad username or password.
        let (_socket, result) = tokio::join!(
            answer_connect(&listener, 4),
            tokio::time::timeout(WAIT, connection.run(shutdown)),
        );

        let result = result.expect("connection gives up without retrying");
        assert!(matches!(result, Err(BridgeError::MqttConnection(_))));
        assert_eq!(publisher.state(), BusState::Failed);
    }

    #[tokio::test]
    async fn test_lost_broker_connection_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (publisher, connection) = Publisher::connect(&local_config(port), None).unwrap();
        let mut state = publisher.state_watch();
        let (_stop, shutdown) = watch::channel(false);
        let bus = tokio::spawn(connection.run(shutdown));

        let first = answer_connect(&listener, 0).await;
        wait_for_bus(&mut state, BusState::Connected).await;

        drop(first);
        wait_for_bus(&mut state, BusState::Disconnected).await;

        let _second = answer_connect(&listener, 0).await;
        wait_for_bus(&mut state, BusState::Connected).await;
        assert!(!bus.is_finished());

        bus.abort();
    }

    #[test]
    fn test_publish_stats() {
        let mut stats = PublishStats::default();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.success_rate(), 100.0);

        stats.success = 8;
        stats.failed = 2;
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.success_rate(), 80.0);
    }
}
