//! Tesla telemetry stream to MQTT bridge.
//!
//! Keeps one stream per configured vehicle, converts every field to metric
//! and publishes it to `{prefix}/{car}/{field}` on the MQTT broker.

use anyhow::{Context, Result};
use tesla_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use tesla_mqtt_bridge::session::{SessionSettings, WebSocketTransport};
use tesla_mqtt_bridge::{Supervisor, TeslaBridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments and collect .env + process environment
    let args = BridgeArgs::parse();
    let vars = args.environment().context("Failed to read environment")?;

    // Load configuration (fatal on any invalid setting)
    let config = TeslaBridgeConfig::from_sources(args.config.as_deref(), &vars)
        .context("Invalid configuration")?;

    // Create the bridge runner (logging + MQTT connection)
    let mut runner = BridgeRunner::new("tesla", config, &args)
        .await
        .context("Failed to start bridge")?;

    let stream = runner.config().stream.clone();
    let vehicles = runner.config().identities();

    let transport =
        WebSocketTransport::new(&stream).context("Failed to set up TLS for the stream")?;

    tracing::info!(
        uri = %stream.uri,
        vehicles = vehicles.len(),
        prefix = %runner.config().topic_prefix(),
        "Starting vehicle streams"
    );

    let supervisor = Supervisor::new(
        transport,
        runner.publisher(),
        SessionSettings::from(&stream),
        runner.publisher().topics().clone(),
        stream.queue_capacity,
    );
    let handle = supervisor.start(&vehicles, runner.shutdown_receiver());

    runner.spawn(async move {
        for (vehicle, stats) in handle.join().await {
            tracing::info!(
                car = vehicle.car_number,
                published = stats.success,
                failed = stats.failed,
                success_rate = stats.success_rate(),
                "Final statistics"
            );
        }
    });

    // Build status metadata
    let metadata = serde_json::json!({
        "vehicles": vehicles.iter().map(|v| v.car_number).collect::<Vec<_>>(),
        "stream_uri": stream.uri,
    });

    runner.run_with_metadata(Some(metadata)).await?;
    Ok(())
}
