//! RideLink - BLE fitness sensor bridge
//!
//! Discovers every supported sensor in range, connects to it, and prints the
//! merged sample stream as JSON lines until interrupted.

use anyhow::Context;
use ridelink::sensors::{BtleplugTransport, DeviceRole, SensorConfig, SensorEvent, SensorManager};
use ridelink::storage::config::load_config;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));

    let app_config = load_config().context("loading configuration")?;
    let config = SensorConfig::from(&app_config.sensors);

    let transport = BtleplugTransport::new(config.scan_window)
        .await
        .context("initializing Bluetooth")?;
    let mut manager = SensorManager::new(Arc::new(transport), config);
    let events = manager.event_receiver();

    let devices = manager
        .smart_discover(&DeviceRole::ALL)
        .await
        .context("discovering sensors")?;
    for device in &devices {
        if let Err(e) = manager.connect(&device.id).await {
            tracing::warn!("Skipping {}: {}", device.name, e);
        }
    }
    if manager.connected_devices().is_empty() {
        anyhow::bail!("no sensor could be connected");
    }

    manager.start_session();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            alive = manager.pump() => {
                if !alive {
                    tracing::warn!("Transport event stream ended");
                    break;
                }
            }
        }

        for event in events.try_iter() {
            match event {
                SensorEvent::Sample(sample) => println!("{}", serde_json::to_string(&sample)?),
                SensorEvent::Disconnected {
                    name,
                    unexpected: true,
                    ..
                } => tracing::warn!("{} dropped out", name),
                SensorEvent::ConnectionError { device_id, reason } => {
                    tracing::error!("{} is gone: {}", device_id, reason)
                }
                _ => {}
            }
        }
    }

    manager.stop_session();
    manager.shutdown().await;
    Ok(())
}
