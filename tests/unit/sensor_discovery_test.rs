//! Unit tests for service profiles and device classification.

use ridelink::sensors::classifier::{
    role_from_device_information, role_from_name, ClassifierInput, DeviceClassifier,
};
use ridelink::sensors::decoders::{DeviceInformation, PnpId};
use ridelink::sensors::fake::{FakePeripheral, FakeTransport};
use ridelink::sensors::profiles::{
    characteristic_for_uuid, filters_for, profile_for, role_for_service, CharacteristicKind,
    BATTERY_LEVEL_UUID, CSC_SERVICE_UUID, CYCLING_POWER_SERVICE_UUID, FTMS_SERVICE_UUID,
    HEART_RATE_SERVICE_UUID, SHIFTING_SERVICE_UUID,
};
use ridelink::sensors::transport::{BleTransport, ScanFilter};
use ridelink::sensors::DeviceRole;
use uuid::Uuid;

#[test]
fn test_ftms_service_uuid() {
    // FTMS Service UUID should be 0x1826
    assert_eq!(
        FTMS_SERVICE_UUID,
        Uuid::from_u128(0x00001826_0000_1000_8000_00805f9b34fb)
    );
}

#[test]
fn test_cycling_power_service_uuid() {
    // Cycling Power Service UUID should be 0x1818
    assert_eq!(
        CYCLING_POWER_SERVICE_UUID,
        Uuid::from_u128(0x00001818_0000_1000_8000_00805f9b34fb)
    );
}

#[test]
fn test_heart_rate_service_uuid() {
    // Heart Rate Service UUID should be 0x180D
    assert_eq!(
        HEART_RATE_SERVICE_UUID,
        Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb)
    );
}

#[test]
fn test_shifting_service_uuid() {
    assert_eq!(
        SHIFTING_SERVICE_UUID,
        Uuid::parse_str("00001530-1212-efde-1523-785feabcd123").unwrap()
    );
}

#[test]
fn test_primary_service_per_role() {
    assert_eq!(role_for_service(&FTMS_SERVICE_UUID), Some(DeviceRole::Trainer));
    assert_eq!(
        role_for_service(&CYCLING_POWER_SERVICE_UUID),
        Some(DeviceRole::PowerMeter)
    );
    assert_eq!(
        role_for_service(&HEART_RATE_SERVICE_UUID),
        Some(DeviceRole::HeartRate)
    );
    assert_eq!(
        role_for_service(&SHIFTING_SERVICE_UUID),
        Some(DeviceRole::ElectronicShifting)
    );
}

#[test]
fn test_trainer_profile_includes_power_and_cadence() {
    let profile = profile_for(DeviceRole::Trainer);
    assert!(profile.has_characteristic(CharacteristicKind::IndoorBikeData));
    assert!(profile.has_characteristic(CharacteristicKind::CyclingPowerMeasurement));
    assert!(profile.has_characteristic(CharacteristicKind::CscMeasurement));
    assert!(profile
        .filters
        .contains(&ScanFilter::Service(CSC_SERVICE_UUID)));
}

#[test]
fn test_union_of_filters_has_no_duplicates() {
    let filters = filters_for(&[DeviceRole::Trainer, DeviceRole::PowerMeter]);
    assert_eq!(filters.len(), 3);
}

#[test]
fn test_characteristic_lookup_is_role_scoped() {
    assert_eq!(
        characteristic_for_uuid(DeviceRole::HeartRate, &BATTERY_LEVEL_UUID),
        Some(CharacteristicKind::BatteryLevel)
    );
    assert_eq!(
        characteristic_for_uuid(
            DeviceRole::HeartRate,
            &CharacteristicKind::IndoorBikeData.uuid()
        ),
        None
    );
}

#[test]
fn test_name_classification() {
    assert_eq!(role_from_name("Wahoo KICKR"), Some(DeviceRole::Trainer));
    assert_eq!(role_from_name("TACX NEO 2T"), Some(DeviceRole::Trainer));
    assert_eq!(role_from_name("Quarq DZero"), Some(DeviceRole::PowerMeter));
    assert_eq!(role_from_name("HRM-Dual"), Some(DeviceRole::HeartRate));
    assert_eq!(
        role_from_name("Ultegra RX"),
        Some(DeviceRole::ElectronicShifting)
    );
}

#[test]
fn test_device_information_classification() {
    let info = DeviceInformation {
        manufacturer: Some("Elite srl".to_string()),
        ..Default::default()
    };
    assert_eq!(role_from_device_information(&info), Some(DeviceRole::Trainer));

    let info = DeviceInformation {
        pnp: Some(PnpId {
            vendor_id_source: 1,
            vendor_id: 0x009A,
            product_id: 0,
            product_version: 0,
        }),
        ..Default::default()
    };
    assert_eq!(
        role_from_device_information(&info),
        Some(DeviceRole::ElectronicShifting)
    );
}

#[tokio::test]
async fn test_classifier_uses_live_services_first() {
    let transport = FakeTransport::new();
    transport.add_peripheral(FakePeripheral::new("pm").with_role(DeviceRole::PowerMeter));
    transport.connect("pm").await.unwrap();

    let input = ClassifierInput {
        peripheral_id: "pm".to_string(),
        name: None,
    };
    let role = DeviceClassifier::new().identify(&transport, &input).await;
    assert_eq!(role, Some(DeviceRole::PowerMeter));
}

#[tokio::test]
async fn test_classifier_falls_back_to_name() {
    let transport = FakeTransport::new();
    transport.add_peripheral(FakePeripheral::new("kickr").named("Wahoo KICKR"));

    let input = ClassifierInput {
        peripheral_id: "kickr".to_string(),
        name: Some("Wahoo KICKR".to_string()),
    };
    let role = DeviceClassifier::new().identify(&transport, &input).await;
    assert_eq!(role, Some(DeviceRole::Trainer));
    assert_eq!(transport.connect_calls("kickr"), 0);
}

#[tokio::test]
async fn test_classifier_reads_device_information_and_closes_link() {
    let transport = FakeTransport::new();
    transport.add_peripheral(
        FakePeripheral::new("strap")
            .named("XYZ-123")
            .with_device_information("Polar Electro Oy", None),
    );

    let input = ClassifierInput {
        peripheral_id: "strap".to_string(),
        name: Some("XYZ-123".to_string()),
    };
    let role = DeviceClassifier::new().identify(&transport, &input).await;
    assert_eq!(role, Some(DeviceRole::HeartRate));
    assert!(!transport.link_open("strap"));
}

#[tokio::test]
async fn test_classifier_unresolved() {
    let transport = FakeTransport::new();
    transport.add_peripheral(FakePeripheral::new("mystery").failing_connects(1));

    let input = ClassifierInput {
        peripheral_id: "mystery".to_string(),
        name: None,
    };
    assert_eq!(DeviceClassifier::new().identify(&transport, &input).await, None);
}
