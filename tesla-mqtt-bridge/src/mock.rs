//! In-memory stream transport and recording sink.
//!
//! Lets the whole supervisor pipeline run without a streaming endpoint or an
//! MQTT broker: tests script each connection attempt and inspect what would
//! have been published.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

use tesla_bridge_common::{CanonicalReading, VehicleIdentity, VehicleStatus};
use tesla_bridge_framework::{PublishError, ReadingSink};

use crate::error::SessionError;
use crate::session::{Inbound, StreamConnection, StreamTransport};

/// What the next connection attempt for a car does.
enum ConnectScript {
    Accept(MemoryConnection),
    Refuse(String),
    Hang,
    Panic,
}

/// Transport whose connection attempts are scripted per car number.
///
/// Attempts with nothing scripted fail with a connect error.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    scripts: Arc<Mutex<HashMap<u8, VecDeque<ConnectScript>>>>,
    attempts: Arc<Mutex<HashMap<u8, usize>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, car_number: u8, script: ConnectScript) {
        self.scripts
            .lock()
            .await
            .entry(car_number)
            .or_default()
            .push_back(script);
    }

    /// Accept the next attempt; returns the server end of the connection.
    pub async fn accept(&self, car_number: u8) -> MemoryServer {
        let (connection, server) = memory_pair();
        self.push(car_number, ConnectScript::Accept(connection)).await;
        server
    }

    /// Fail the next attempt with a connect error.
    pub async fn refuse(&self, car_number: u8, reason: impl Into<String>) {
        self.push(car_number, ConnectScript::Refuse(reason.into())).await;
    }

    /// Never complete the next attempt.
    pub async fn hang(&self, car_number: u8) {
        self.push(car_number, ConnectScript::Hang).await;
    }

    /// Panic inside the next attempt.
    pub async fn panic_next(&self, car_number: u8) {
        self.push(car_number, ConnectScript::Panic).await;
    }

    /// Number of connection attempts made for a car.
    pub async fn attempts(&self, car_number: u8) -> usize {
        self.attempts
            .lock()
            .await
            .get(&car_number)
            .copied()
            .unwrap_or(0)
    }
}

impl StreamTransport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self, vehicle: &VehicleIdentity) -> Result<MemoryConnection, SessionError> {
        *self
            .attempts
            .lock()
            .await
            .entry(vehicle.car_number)
            .or_default() += 1;

        let script = self
            .scripts
            .lock()
            .await
            .get_mut(&vehicle.car_number)
            .and_then(VecDeque::pop_front);

        match script {
            Some(ConnectScript::Accept(connection)) => Ok(connection),
            Some(ConnectScript::Refuse(reason)) => Err(SessionError::Connect(reason)),
            Some(ConnectScript::Hang) => std::future::pending().await,
            Some(ConnectScript::Panic) => panic!("scripted transport panic for {}", vehicle),
            None => Err(SessionError::Connect("no scripted connection".to_string())),
        }
    }
}

/// Message sent by a session to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

fn memory_pair() -> (MemoryConnection, MemoryServer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let connection = MemoryConnection {
        inbound: inbound_rx,
        outbound: outbound_tx,
        closed: closed.clone(),
    };
    let server = MemoryServer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        closed,
    };
    (connection, server)
}

/// Session end of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl StreamConnection for MemoryConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SessionError::Transport("server gone".to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Ping)
            .map_err(|_| SessionError::Transport("server gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server end of an in-memory connection.
pub struct MemoryServer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    closed: Arc<AtomicBool>,
}

impl MemoryServer {
    /// Deliver a message to the session. Returns false once the session
    /// has released the connection.
    pub fn send(&self, inbound: Inbound) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(inbound).is_ok())
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Inbound::Text(text.into()))
    }

    /// End the stream from the server side.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next message the session sent.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Whether the session closed or dropped its end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Something handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Reading(CanonicalReading),
    Status(VehicleIdentity, VehicleStatus),
}

/// Sink that records everything it is asked to publish.
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<Published>>>,
    changed: Arc<Notify>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, published: Published) {
        self.records.lock().await.push(published);
        self.changed.notify_waiters();
    }

    pub async fn records(&self) -> Vec<Published> {
        self.records.lock().await.clone()
    }

    /// Readings published for one car, in publish order.
    pub async fn readings(&self, car_number: u8) -> Vec<CanonicalReading> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|p| match p {
                Published::Reading(r) if r.vehicle.car_number == car_number => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Statuses published for one car, in publish order.
    pub async fn statuses(&self, car_number: u8) -> Vec<VehicleStatus> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|p| match p {
                Published::Status(v, s) if v.car_number == car_number => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// Wait until the recorded history satisfies `done`.
    pub async fn wait_until<F>(&self, mut done: F)
    where
        F: FnMut(&[Published]) -> bool,
    {
        loop {
            let changed = self.changed.notified();
            if done(&self.records.lock().await) {
                return;
            }
            changed.await;
        }
    }
}

impl ReadingSink for RecordingSink {
    async fn publish(&self, reading: &CanonicalReading) -> Result<(), PublishError> {
        self.record(Published::Reading(reading.clone())).await;
        Ok(())
    }

    async fn publish_status(
        &self,
        vehicle: &VehicleIdentity,
        status: VehicleStatus,
    ) -> Result<(), PublishError> {
        self.record(Published::Status(vehicle.clone(), status)).await;
        Ok(())
    }
}
