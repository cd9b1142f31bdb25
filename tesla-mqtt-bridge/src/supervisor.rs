//! Bridge supervisor: one session and one pipeline per vehicle.
//!
//! Each vehicle gets a session task that decodes its stream and a pipeline
//! task that runs every event through normalize, discover and publish, in
//! receipt order. The two are joined by a bounded channel and restarted
//! together, from `Disconnected`, when either of them crashes. The vehicle's
//! discovery registry outlives restarts. Other vehicles are unaffected.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use tesla_bridge_common::{TopicBuilder, VehicleIdentity};
use tesla_bridge_framework::{PublishStats, ReadingSink};

use crate::discovery::DiscoveryRegistry;
use crate::normalizer::normalize;
use crate::session::{
    SessionEnd, SessionEvent, SessionSettings, SessionState, StreamTransport, VehicleSession,
};

/// Discovery registry shared by the successive pipelines of one vehicle.
pub type SharedRegistry = Arc<Mutex<DiscoveryRegistry>>;

/// Starts and restarts vehicle sessions.
pub struct Supervisor<T, S> {
    transport: T,
    sink: S,
    settings: Arc<SessionSettings>,
    topics: TopicBuilder,
    queue_capacity: usize,
}

impl<T, S> Supervisor<T, S>
where
    T: StreamTransport,
    S: ReadingSink,
{
    pub fn new(
        transport: T,
        sink: S,
        settings: SessionSettings,
        topics: TopicBuilder,
        queue_capacity: usize,
    ) -> Self {
        Self {
            transport,
            sink,
            settings: Arc::new(settings),
            topics,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Start every vehicle. Workers run until `shutdown` flips to true.
    pub fn start(
        &self,
        vehicles: &[VehicleIdentity],
        shutdown: watch::Receiver<bool>,
    ) -> SupervisorHandle {
        let workers = vehicles
            .iter()
            .map(|vehicle| self.start_vehicle(vehicle.clone(), shutdown.clone()))
            .collect();

        tracing::info!(vehicles = vehicles.len(), "Supervisor started");
        SupervisorHandle { workers }
    }

    fn start_vehicle(
        &self,
        vehicle: VehicleIdentity,
        shutdown: watch::Receiver<bool>,
    ) -> VehicleWorker {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let unit = VehicleUnit {
            registry: Arc::new(Mutex::new(DiscoveryRegistry::new(
                vehicle.clone(),
                self.topics.clone(),
            ))),
            vehicle: vehicle.clone(),
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            settings: self.settings.clone(),
            state: Arc::new(state_tx),
            queue_capacity: self.queue_capacity,
        };

        VehicleWorker {
            vehicle,
            state: state_rx,
            task: tokio::spawn(unit.supervise(shutdown)),
        }
    }
}

/// Everything needed to (re)start one vehicle's session and pipeline.
struct VehicleUnit<T, S> {
    vehicle: VehicleIdentity,
    transport: T,
    sink: S,
    settings: Arc<SessionSettings>,
    state: Arc<watch::Sender<SessionState>>,
    registry: SharedRegistry,
    queue_capacity: usize,
}

impl<T: StreamTransport, S: ReadingSink> VehicleUnit<T, S> {
    /// Run session and pipeline, restarting both whenever either crashes.
    async fn supervise(self, mut shutdown: watch::Receiver<bool>) -> PublishStats {
        let car = self.vehicle.car_number;
        let mut totals = PublishStats::default();
        let mut restarts = 0u32;

        loop {
            let (events_tx, events_rx) = mpsc::channel(self.queue_capacity);

            let pipeline = tokio::spawn(run_pipeline(
                self.vehicle.clone(),
                events_rx,
                self.sink.clone(),
                self.registry.clone(),
            ));
            let session = tokio::spawn(
                VehicleSession::new(
                    self.vehicle.clone(),
                    self.transport.clone(),
                    self.settings.clone(),
                    events_tx,
                    self.state.clone(),
                )
                .run(shutdown.clone()),
            );

            // The session owns the only sender, so the pipeline drains and
            // stops once the session is gone.
            let ended = session.await;
            match pipeline.await {
                Ok(stats) => {
                    totals.success += stats.success;
                    totals.failed += stats.failed;
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(car, "Vehicle pipeline crashed");
                }
                Err(e) => tracing::debug!(car, error = %e, "Vehicle pipeline cancelled"),
            }

            match ended {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::PipelineClosed) => {}
                Err(e) if e.is_panic() => {
                    tracing::error!(car, "Stream session crashed");
                }
                Err(e) => {
                    tracing::debug!(car, error = %e, "Stream session cancelled");
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            restarts += 1;
            self.state.send_replace(SessionState::Disconnected);
            tracing::warn!(
                car,
                restarts,
                delay_secs = self.settings.reconnect_delay.as_secs(),
                "Restarting vehicle session and pipeline"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        totals
    }
}

/// Normalize, discover and publish one vehicle's events in order.
pub async fn run_pipeline<S: ReadingSink>(
    vehicle: VehicleIdentity,
    mut events: mpsc::Receiver<SessionEvent>,
    sink: S,
    registry: SharedRegistry,
) -> PublishStats {
    let mut stats = PublishStats::default();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Field(field) => {
                let normalized = match normalize(&field.field_name, &field.raw_value) {
                    Ok(normalized) => normalized,
                    Err(e) => {
                        tracing::warn!(
                            car = vehicle.car_number,
                            field = %field.field_name,
                            error = %e,
                            "Dropping malformed field"
                        );
                        continue;
                    }
                };

                registry.lock().await.observe(&field.field_name, &normalized.topic_suffix);
                let reading = normalized.into_reading(vehicle.clone());

                match sink.publish(&reading).await {
                    Ok(()) => stats.success += 1,
                    Err(e) => {
                        stats.failed += 1;
                        if e.is_transient() {
                            tracing::warn!(car = vehicle.car_number, error = %e, "Publish failed");
                        } else {
                            tracing::error!(car = vehicle.car_number, error = %e, "Publish failed");
                        }
                    }
                }
            }
            SessionEvent::Status(status) => {
                if let Err(e) = sink.publish_status(&vehicle, status).await {
                    tracing::warn!(
                        car = vehicle.car_number,
                        status = %status,
                        error = %e,
                        "Failed to publish vehicle status"
                    );
                }
            }
        }
    }

    let discovered = registry.lock().await.len();
    tracing::info!(
        car = vehicle.car_number,
        published = stats.success,
        failed = stats.failed,
        discovered = discovered,
        "Vehicle pipeline stopped"
    );
    stats
}

struct VehicleWorker {
    vehicle: VehicleIdentity,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<PublishStats>,
}

/// Handle to the running vehicles.
pub struct SupervisorHandle {
    workers: Vec<VehicleWorker>,
}

impl SupervisorHandle {
    /// Current session state of a car.
    pub fn state(&self, car_number: u8) -> Option<SessionState> {
        self.state_watch(car_number).map(|rx| *rx.borrow())
    }

    /// Watch a car's session state.
    pub fn state_watch(&self, car_number: u8) -> Option<watch::Receiver<SessionState>> {
        self.workers
            .iter()
            .find(|w| w.vehicle.car_number == car_number)
            .map(|w| w.state.clone())
    }

    /// Wait for every vehicle to stop; returns its publish totals.
    pub async fn join(self) -> Vec<(VehicleIdentity, PublishStats)> {
        let mut results = Vec::with_capacity(self.workers.len());

        for worker in self.workers {
            let stats = match worker.task.await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(
                        car = worker.vehicle.car_number,
                        error = %e,
                        "Vehicle supervisor ended abnormally"
                    );
                    PublishStats::default()
                }
            };
            results.push((worker.vehicle, stats));
        }

        results
    }
}
