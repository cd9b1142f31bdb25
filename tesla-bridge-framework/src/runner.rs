//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tesla_bridge_common::init_tracing;

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::{BusState, Publisher};
use crate::status::{BridgeStatus, StatusPublisher};

/// How long spawned workers get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of the bridge.
///
/// Handles:
/// - Logging initialization
/// - MQTT connection (with the bridge status as last will)
/// - Task spawning and cooperative shutdown
/// - Shutdown on Ctrl+C, SIGTERM or a permanent broker rejection
/// - Bridge status publishing
///
/// # Example
///
/// ```ignore
/// use tesla_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> tesla_bridge_framework::Result<()> {
///     let args = BridgeArgs::parse();
///     let vars = args.environment()?;
///     let config = MyBridgeConfig::from_sources(args.config.as_deref(), &vars)?;
///
///     let mut runner = BridgeRunner::new("mybridge", config, &args).await?;
///
///     let publisher = runner.publisher();
///     let shutdown = runner.shutdown_receiver();
///     runner.spawn(my_worker(publisher, shutdown));
///
///     runner.run_with_metadata(None).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// The loaded configuration.
    config: C,
    /// Publisher for telemetry.
    publisher: Publisher,
    /// Bridge status publisher.
    status_publisher: StatusPublisher,
    /// MQTT event loop task.
    bus_task: JoinHandle<Result<()>>,
    /// Shutdown broadcast to workers.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging from config, with CLI overrides
    /// 2. Create the MQTT publisher with an "offline" last will
    /// 3. Start the MQTT event loop
    pub async fn new(name: impl Into<String>, config: C, args: &BridgeArgs) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = args.effective_logging(config.logging());
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let topics = tesla_bridge_common::TopicBuilder::new(config.topic_prefix());
        let last_will = BridgeStatus::offline(&name, &version).as_last_will(&topics)?;

        let (publisher, connection) = Publisher::connect(config.mqtt(), Some(last_will))?;
        let bus_task = tokio::spawn(connection.run(shutdown_rx));

        let status_publisher = StatusPublisher::new(publisher.clone(), &name, &version);

        Ok(Self {
            name,
            config,
            publisher,
            status_publisher,
            bus_task,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Receiver that flips to `true` when the bridge is shutting down.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task.
    ///
    /// Workers should watch [`shutdown_receiver`](Self::shutdown_receiver);
    /// those still running after the grace period are aborted.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Run the bridge until a shutdown signal arrives, announcing `metadata`
    /// with the running status.
    ///
    /// Returns an error if the broker rejected the connection permanently.
    pub async fn run_with_metadata(mut self, metadata: Option<serde_json::Value>) -> Result<()> {
        if let Err(e) = self.status_publisher.publish_running(metadata).await {
            tracing::warn!(error = %e, "Failed to publish running status");
        }

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let mut bus_state = self.publisher.state_watch();
        let bus_failed = tokio::select! {
            _ = shutdown_signal() => false,
            _ = async { bus_state.wait_for(|s| *s == BusState::Failed).await.map(|_| ()) } => true,
        };

        if let Err(e) = self.shutdown_tx.send(true) {
            tracing::debug!(error = %e, "No workers listening for shutdown");
        }

        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Worker ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Workers did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        if bus_failed {
            let reason = match self.bus_task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => BridgeError::MqttConnection("event loop stopped".to_string()),
                Err(e) => BridgeError::worker(format!("MQTT event loop panicked: {}", e)),
            };
            tracing::error!(bridge = %self.name, error = %reason, "Stopping on broker failure");
            return Err(reason);
        }

        if let Err(e) = self.status_publisher.publish_offline().await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }

        self.publisher.disconnect().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.bus_task).await {
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "MQTT event loop ended with error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "MQTT event loop panicked"),
            Ok(Ok(Ok(()))) => {}
            Err(_) => {
                tracing::warn!("MQTT disconnect timed out");
                self.bus_task.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
