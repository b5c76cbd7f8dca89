//! Integration tests for scanning and multi-role discovery.

use super::sensor_mock::{mock_manager, quick_config};
use ridelink::sensors::fake::FakePeripheral;
use ridelink::sensors::profiles::DEVICE_INFORMATION_SERVICE_UUID;
use ridelink::sensors::{DeviceRole, SensorError, SensorEvent};

#[tokio::test]
async fn test_scan_emits_events() {
    let kickr = FakePeripheral::new("kickr")
        .named("KICKR")
        .with_role(DeviceRole::Trainer);
    let mut manager = mock_manager(vec![kickr], quick_config());
    let events = manager.event_receiver();

    let device = manager.scan(DeviceRole::Trainer).await.unwrap();
    assert_eq!(device.id, "kickr");
    assert_eq!(device.name, "KICKR");
    assert_eq!(device.signal_strength, Some(-60));

    let seen: Vec<SensorEvent> = events.try_iter().collect();
    assert!(matches!(seen[0], SensorEvent::ScanStarted));
    assert!(matches!(seen[1], SensorEvent::ScanStopped));
    assert!(matches!(seen[2], SensorEvent::Discovered(ref d) if d.id == "kickr"));
}

#[tokio::test]
async fn test_rediscovery_replaces_entry() {
    let kickr = FakePeripheral::new("kickr").with_role(DeviceRole::Trainer);
    let mut manager = mock_manager(vec![kickr], quick_config());

    manager.scan(DeviceRole::Trainer).await.unwrap();
    manager.scan(DeviceRole::Trainer).await.unwrap();

    assert_eq!(manager.discovered().len(), 1);
}

#[tokio::test]
async fn test_unnamed_device_gets_role_name() {
    let strap = FakePeripheral::new("strap").with_role(DeviceRole::HeartRate);
    let mut manager = mock_manager(vec![strap], quick_config());

    let device = manager.scan(DeviceRole::HeartRate).await.unwrap();
    assert!(device.name.starts_with("Unknown"));
}

#[tokio::test]
async fn test_scan_prefers_strongest_signal() {
    let near = FakePeripheral::new("near")
        .rssi(-40)
        .with_role(DeviceRole::HeartRate);
    let far = FakePeripheral::new("far")
        .rssi(-90)
        .with_role(DeviceRole::HeartRate);
    let mut manager = mock_manager(vec![far, near], quick_config());

    let device = manager.scan(DeviceRole::HeartRate).await.unwrap();
    assert_eq!(device.id, "near");
}

#[tokio::test]
async fn test_scan_requests_standard_services() {
    let strap = FakePeripheral::new("strap").with_role(DeviceRole::HeartRate);
    let mut manager = mock_manager(vec![strap], quick_config());
    manager.scan(DeviceRole::HeartRate).await.unwrap();

    let requests = manager.transport().scan_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .optional_services
        .contains(&DEVICE_INFORMATION_SERVICE_UUID));
}

#[tokio::test]
async fn test_no_device_selected() {
    let mut manager = mock_manager(Vec::new(), quick_config());

    assert!(matches!(
        manager.scan(DeviceRole::PowerMeter).await,
        Err(SensorError::ScanRejected(_))
    ));
    assert!(manager.discovered().is_empty());
}

#[tokio::test]
async fn test_smart_discover_without_roles() {
    let kickr = FakePeripheral::new("kickr").with_role(DeviceRole::Trainer);
    let mut manager = mock_manager(vec![kickr], quick_config());

    assert!(matches!(
        manager.smart_discover(&[]).await,
        Err(SensorError::ScanRejected(_))
    ));
}

#[tokio::test]
async fn test_smart_discover_records_every_role() {
    let kickr = FakePeripheral::new("kickr")
        .named("KICKR")
        .with_role(DeviceRole::Trainer)
        .with_role(DeviceRole::PowerMeter);
    let mut manager = mock_manager(vec![kickr], quick_config());

    let devices = manager.smart_discover(&DeviceRole::ALL).await.unwrap();

    let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["kickr_trainer", "kickr_power_meter"]);
    assert!(devices.iter().all(|d| d.peripheral_id == "kickr"));
    // Discovery link is closed again
    assert!(!manager.transport().link_open("kickr"));
}

#[tokio::test]
async fn test_smart_discover_entries_share_one_link() {
    let kickr = FakePeripheral::new("kickr")
        .with_role(DeviceRole::Trainer)
        .with_role(DeviceRole::PowerMeter);
    let mut manager = mock_manager(vec![kickr], quick_config());
    manager.smart_discover(&DeviceRole::ALL).await.unwrap();

    manager.connect("kickr_trainer").await.unwrap();
    manager.connect("kickr_power_meter").await.unwrap();
    assert_eq!(manager.connected_devices().len(), 2);

    // The link stays open while one role still uses it
    manager.disconnect("kickr_trainer").await.unwrap();
    assert!(manager.transport().link_open("kickr"));

    manager.disconnect("kickr_power_meter").await.unwrap();
    assert!(!manager.transport().link_open("kickr"));
}

#[tokio::test]
async fn test_discovery_link_close_keeps_connection() {
    let kickr = FakePeripheral::new("kickr")
        .with_role(DeviceRole::Trainer)
        .with_role(DeviceRole::PowerMeter);
    let mut manager = mock_manager(vec![kickr], quick_config());
    let events = manager.event_receiver();

    manager.smart_discover(&DeviceRole::ALL).await.unwrap();
    manager.connect("kickr_trainer").await.unwrap();
    // The discovery link close is reported after the connection is up
    assert!(manager.pump_pending().await >= 1);

    assert!(manager.is_device_connected("kickr_trainer"));
    assert!(manager.transport().link_open("kickr"));
    assert!(!events.try_iter().any(|e| matches!(
        e,
        SensorEvent::Disconnected {
            unexpected: true,
            ..
        }
    )));
}

#[tokio::test]
async fn test_scan_multiple_keeps_first_supported_role() {
    let strap = FakePeripheral::new("strap").with_role(DeviceRole::HeartRate);
    let mut manager = mock_manager(vec![strap], quick_config());

    let device = manager
        .scan_multiple(&[DeviceRole::Trainer, DeviceRole::HeartRate])
        .await
        .unwrap();

    assert_eq!(device.role, DeviceRole::HeartRate);
    assert_eq!(device.id, "strap");
}

#[tokio::test]
async fn test_scan_multiple_falls_back_to_classifier() {
    // Matches a name filter but exposes no shifting service
    let di2 = FakePeripheral::new("di2")
        .named("SHIMANO Di2 EW-WU111")
        .with_device_information("Shimano Inc.", None);
    let mut manager = mock_manager(vec![di2], quick_config());

    let device = manager
        .scan_multiple(&[DeviceRole::ElectronicShifting])
        .await
        .unwrap();

    assert_eq!(device.role, DeviceRole::ElectronicShifting);
}

#[tokio::test]
async fn test_clear_discovered() {
    let kickr = FakePeripheral::new("kickr").with_role(DeviceRole::Trainer);
    let mut manager = mock_manager(vec![kickr], quick_config());
    manager.scan(DeviceRole::Trainer).await.unwrap();

    manager.clear_discovered();
    assert!(manager.discovered().is_empty());
}
