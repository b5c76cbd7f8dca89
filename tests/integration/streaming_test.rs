//! Integration tests for the merged sample stream.

use super::sensor_mock::{mock_manager, quick_config, MockSensorData};
use ridelink::sensors::decoders::RoleDetail;
use ridelink::sensors::fake::{FakePeripheral, FakeTransport};
use ridelink::sensors::profiles::{CharacteristicKind, BATTERY_LEVEL_UUID};
use ridelink::sensors::{CanonicalSample, DeviceRole, SensorEvent, SensorManager};

async fn ride() -> SensorManager<FakeTransport> {
    let kickr = FakePeripheral::new("kickr").with_role(DeviceRole::Trainer);
    let strap = FakePeripheral::new("strap")
        .with_role(DeviceRole::HeartRate)
        .with_battery(90);
    let mut manager = mock_manager(vec![kickr, strap], quick_config());

    manager.scan(DeviceRole::Trainer).await.unwrap();
    manager.scan(DeviceRole::HeartRate).await.unwrap();
    manager.connect("kickr").await.unwrap();
    manager.connect("strap").await.unwrap();
    manager.start_session();
    manager
}

fn samples(events: &crossbeam::channel::Receiver<SensorEvent>) -> Vec<CanonicalSample> {
    events
        .try_iter()
        .filter_map(|e| match e {
            SensorEvent::Sample(sample) => Some(sample),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_trainer_and_heart_rate_merge() {
    let mut manager = ride().await;
    let events = manager.event_receiver();
    let mock = MockSensorData::default();

    assert!(manager.transport().notify(
        "kickr",
        CharacteristicKind::IndoorBikeData.uuid(),
        &mock.generate_ftms_indoor_bike_data(),
    ));
    assert!(manager.transport().notify(
        "strap",
        CharacteristicKind::HeartRateMeasurement.uuid(),
        &mock.generate_heart_rate_measurement(),
    ));
    assert_eq!(manager.pump_pending().await, 2);

    let emitted = samples(&events);
    assert_eq!(emitted.len(), 2);
    // The first sample carries only what the trainer reported
    assert_eq!(emitted[0].power, Some(200));
    assert!(emitted[0].heart_rate.is_none());

    let latest = manager.latest_sample();
    assert_eq!(latest.power, Some(200));
    assert_eq!(latest.cadence, Some(90.0));
    assert_eq!(latest.heart_rate, Some(145));
    assert!(latest.detail(DeviceRole::Trainer).is_some());
    assert!(latest.detail(DeviceRole::HeartRate).is_some());
}

#[tokio::test]
async fn test_truncated_payload_is_dropped() {
    let mut manager = ride().await;
    let events = manager.event_receiver();

    manager.transport().notify(
        "strap",
        CharacteristicKind::HeartRateMeasurement.uuid(),
        &[0x01, 0x50],
    );
    manager.pump_pending().await;

    assert!(samples(&events).is_empty());
    assert!(manager.latest_sample().heart_rate.is_none());
    // The connection survives a bad payload
    assert!(manager.is_device_connected("strap"));
}

#[tokio::test]
async fn test_status_notifications_emit_nothing() {
    let mut manager = ride().await;
    let events = manager.event_receiver();

    manager.transport().notify(
        "kickr",
        CharacteristicKind::FitnessMachineStatus.uuid(),
        &[0x04],
    );
    manager.pump_pending().await;

    assert!(samples(&events).is_empty());
}

#[tokio::test]
async fn test_battery_notification_updates_sample() {
    let mut manager = ride().await;
    let events = manager.event_receiver();

    manager.transport().notify("strap", BATTERY_LEVEL_UUID, &[64]);
    manager.pump_pending().await;

    let emitted = samples(&events);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].battery_level, Some(64));
    assert_eq!(manager.connection("strap").unwrap().battery_level, Some(64));
}

#[tokio::test]
async fn test_paused_connection_emits_nothing() {
    let mut manager = ride().await;
    let events = manager.event_receiver();
    manager.stop_streaming("kickr").await.unwrap();

    let delivered = manager.transport().notify(
        "kickr",
        CharacteristicKind::IndoorBikeData.uuid(),
        &MockSensorData::default().generate_ftms_indoor_bike_data(),
    );
    manager.pump_pending().await;

    assert!(!delivered);
    assert!(samples(&events).is_empty());
}

#[tokio::test]
async fn test_shared_characteristic_feeds_both_roles() {
    let kickr = FakePeripheral::new("kickr")
        .with_role(DeviceRole::Trainer)
        .with_role(DeviceRole::PowerMeter);
    let mut manager = mock_manager(vec![kickr], quick_config());
    let events = manager.event_receiver();
    manager.smart_discover(&DeviceRole::ALL).await.unwrap();
    manager.connect("kickr_trainer").await.unwrap();
    manager.connect("kickr_power_meter").await.unwrap();

    let mock = MockSensorData {
        power: 310,
        ..Default::default()
    };
    manager.transport().notify(
        "kickr",
        CharacteristicKind::CyclingPowerMeasurement.uuid(),
        &mock.generate_cycling_power_measurement(),
    );
    manager.pump_pending().await;

    assert_eq!(samples(&events).len(), 2);
    let latest = manager.latest_sample();
    assert_eq!(latest.power, Some(310));
    assert!(matches!(
        latest.detail(DeviceRole::PowerMeter),
        Some(RoleDetail::PowerMeter(detail)) if detail.power_watts == Some(310)
    ));
}

#[tokio::test]
async fn test_sample_resets_when_last_device_leaves() {
    let mut manager = ride().await;
    manager.transport().notify(
        "kickr",
        CharacteristicKind::IndoorBikeData.uuid(),
        &MockSensorData::default().generate_ftms_indoor_bike_data(),
    );
    manager.pump_pending().await;
    assert!(manager.latest_sample().power.is_some());

    manager.disconnect("kickr").await.unwrap();
    // Heart rate strap still connected, last values kept
    assert!(manager.latest_sample().power.is_some());

    manager.disconnect("strap").await.unwrap();
    assert!(manager.latest_sample().power.is_none());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let mut manager = ride().await;
    let events = manager.event_receiver();
    assert!(manager.is_session_active());

    manager.stop_session();
    assert!(!manager.is_session_active());
    assert!(events
        .try_iter()
        .any(|e| matches!(e, SensorEvent::SessionStopped)));

    manager.shutdown().await;
    assert!(manager.connected_devices().is_empty());
}
