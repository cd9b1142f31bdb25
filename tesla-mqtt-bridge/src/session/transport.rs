//! Stream transports: how a session reaches the streaming endpoint.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use tesla_bridge_common::VehicleIdentity;

use crate::config::StreamConfig;
use crate::error::SessionError;

/// A message received from the stream, reduced to what a session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Binary payload; only its length is kept.
    Binary(usize),
    Ping,
    Pong,
    /// The server started the closing handshake.
    Close,
}

/// One open stream connection.
pub trait StreamConnection: Send + 'static {
    /// Send a text frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Send a liveness probe.
    fn send_ping(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Next inbound message, or `None` once the stream has ended.
    ///
    /// Must be cancel safe: it is polled inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Inbound, SessionError>>> + Send;

    /// Close the connection. Dropping the connection also releases it.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens stream connections. One transport is shared by every vehicle.
pub trait StreamTransport: Clone + Send + Sync + 'static {
    type Connection: StreamConnection;

    fn connect(
        &self,
        vehicle: &VehicleIdentity,
    ) -> impl Future<Output = Result<Self::Connection, SessionError>> + Send;
}

/// Websocket transport (TLS through native-tls).
#[derive(Clone)]
pub struct WebSocketTransport {
    uri: String,
    connector: Option<Connector>,
}

impl WebSocketTransport {
    /// Build the transport for the configured endpoint.
    pub fn new(config: &StreamConfig) -> Result<Self, native_tls::Error> {
        let connector = if config.uri.to_ascii_lowercase().starts_with("wss://") {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(config.accept_invalid_certs)
                .danger_accept_invalid_hostnames(config.accept_invalid_certs)
                .build()?;
            if config.accept_invalid_certs {
                tracing::warn!(uri = %config.uri, "TLS certificate verification is disabled");
            }
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        Ok(Self {
            uri: config.uri.clone(),
            connector,
        })
    }
}

impl StreamTransport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        vehicle: &VehicleIdentity,
    ) -> Result<WebSocketConnection, SessionError> {
        let (stream, response) =
            connect_async_tls_with_config(self.uri.as_str(), None, false, self.connector.clone())
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))?;

        tracing::debug!(
            car = vehicle.car_number,
            status = %response.status(),
            "Websocket handshake complete"
        );

        Ok(WebSocketConnection { stream })
    }
}

/// An open websocket.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StreamConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), SessionError> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        loop {
            let inbound = match self.stream.next().await? {
                Ok(Message::Text(text)) => Inbound::Text(text),
                Ok(Message::Binary(data)) => Inbound::Binary(data.len()),
                Ok(Message::Ping(_)) => Inbound::Ping,
                Ok(Message::Pong(_)) => Inbound::Pong,
                Ok(Message::Close(_)) => Inbound::Close,
                // Raw frames are never yielded while reading.
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
            };
            return Some(Ok(inbound));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error closing websocket");
        }
    }
}
