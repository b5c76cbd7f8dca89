//! GATT service profiles for each device role.
//!
//! Every role maps to one primary service, the characteristics we try to
//! resolve on it, and the scan filters used to find it.

use crate::sensors::transport::ScanFilter;
use crate::sensors::types::DeviceRole;
use uuid::Uuid;

/// Expand a 16-bit SIG-assigned number to its full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Fitness Machine Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = sig_uuid(0x1826);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid = sig_uuid(0x1818);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid = sig_uuid(0x180d);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = sig_uuid(0x1816);

/// Battery Service UUID (0x180F)
pub const BATTERY_SERVICE_UUID: Uuid = sig_uuid(0x180f);

/// Battery Level characteristic UUID (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = sig_uuid(0x2a19);

/// Device Information Service UUID (0x180A)
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid = sig_uuid(0x180a);

/// Shimano Di2 vendor service. Undocumented; see the shifting decoder.
pub const SHIFTING_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1530_1212_efde_1523_785f_eabc_d123);

/// Named characteristics across all role profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicKind {
    // Fitness Machine Service
    IndoorBikeData,
    FitnessMachineFeature,
    FitnessMachineControlPoint,
    FitnessMachineStatus,
    SupportedResistanceLevelRange,
    // Cycling Power Service
    CyclingPowerMeasurement,
    CyclingPowerFeature,
    SensorLocation,
    CyclingPowerControlPoint,
    CyclingPowerVector,
    // Cycling Speed and Cadence
    CscMeasurement,
    CscFeature,
    // Heart Rate Service
    HeartRateMeasurement,
    BodySensorLocation,
    HeartRateControlPoint,
    // Shifting vendor service
    GearPosition,
    ShifterControl,
    ShifterStatus,
    // Battery Service
    BatteryLevel,
}

impl CharacteristicKind {
    /// The characteristic's UUID.
    pub fn uuid(&self) -> Uuid {
        use CharacteristicKind::*;
        match self {
            IndoorBikeData => sig_uuid(0x2ad2),
            FitnessMachineFeature => sig_uuid(0x2acc),
            FitnessMachineControlPoint => sig_uuid(0x2ad9),
            FitnessMachineStatus => sig_uuid(0x2ada),
            SupportedResistanceLevelRange => sig_uuid(0x2ad6),
            CyclingPowerMeasurement => sig_uuid(0x2a63),
            CyclingPowerFeature => sig_uuid(0x2a65),
            SensorLocation => sig_uuid(0x2a5d),
            CyclingPowerControlPoint => sig_uuid(0x2a66),
            CyclingPowerVector => sig_uuid(0x2a64),
            CscMeasurement => sig_uuid(0x2a5b),
            CscFeature => sig_uuid(0x2a5c),
            HeartRateMeasurement => sig_uuid(0x2a37),
            BodySensorLocation => sig_uuid(0x2a38),
            HeartRateControlPoint => sig_uuid(0x2a39),
            GearPosition => Uuid::from_u128(0x0000_1531_1212_efde_1523_785f_eabc_d123),
            ShifterControl => Uuid::from_u128(0x0000_1532_1212_efde_1523_785f_eabc_d123),
            ShifterStatus => Uuid::from_u128(0x0000_1534_1212_efde_1523_785f_eabc_d123),
            BatteryLevel => BATTERY_LEVEL_UUID,
        }
    }
}

impl std::fmt::Display for CharacteristicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Immutable GATT profile for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    pub role: DeviceRole,
    pub service: Uuid,
    pub characteristics: &'static [CharacteristicKind],
    pub filters: &'static [ScanFilter],
}

impl ServiceProfile {
    /// Whether this profile names the given characteristic.
    pub fn has_characteristic(&self, kind: CharacteristicKind) -> bool {
        self.characteristics.contains(&kind)
    }
}

const TRAINER_PROFILE: ServiceProfile = ServiceProfile {
    role: DeviceRole::Trainer,
    service: FTMS_SERVICE_UUID,
    characteristics: &[
        CharacteristicKind::IndoorBikeData,
        CharacteristicKind::FitnessMachineFeature,
        CharacteristicKind::FitnessMachineControlPoint,
        CharacteristicKind::FitnessMachineStatus,
        CharacteristicKind::SupportedResistanceLevelRange,
        CharacteristicKind::CyclingPowerMeasurement,
        CharacteristicKind::CyclingPowerFeature,
        CharacteristicKind::CscMeasurement,
        CharacteristicKind::CscFeature,
    ],
    filters: &[
        ScanFilter::Service(FTMS_SERVICE_UUID),
        ScanFilter::Service(CYCLING_POWER_SERVICE_UUID),
        ScanFilter::Service(CSC_SERVICE_UUID),
    ],
};

const POWER_METER_PROFILE: ServiceProfile = ServiceProfile {
    role: DeviceRole::PowerMeter,
    service: CYCLING_POWER_SERVICE_UUID,
    characteristics: &[
        CharacteristicKind::CyclingPowerMeasurement,
        CharacteristicKind::CyclingPowerFeature,
        CharacteristicKind::SensorLocation,
        CharacteristicKind::CyclingPowerControlPoint,
        CharacteristicKind::CyclingPowerVector,
        CharacteristicKind::CscMeasurement,
        CharacteristicKind::CscFeature,
    ],
    filters: &[
        ScanFilter::Service(CYCLING_POWER_SERVICE_UUID),
        ScanFilter::Service(CSC_SERVICE_UUID),
    ],
};

const HEART_RATE_PROFILE: ServiceProfile = ServiceProfile {
    role: DeviceRole::HeartRate,
    service: HEART_RATE_SERVICE_UUID,
    characteristics: &[
        CharacteristicKind::HeartRateMeasurement,
        CharacteristicKind::BodySensorLocation,
        CharacteristicKind::HeartRateControlPoint,
    ],
    filters: &[ScanFilter::Service(HEART_RATE_SERVICE_UUID)],
};

const SHIFTING_PROFILE: ServiceProfile = ServiceProfile {
    role: DeviceRole::ElectronicShifting,
    service: SHIFTING_SERVICE_UUID,
    characteristics: &[
        CharacteristicKind::GearPosition,
        CharacteristicKind::ShifterControl,
        CharacteristicKind::ShifterStatus,
    ],
    filters: &[
        ScanFilter::NamePrefix("SHIMANO"),
        ScanFilter::NamePrefix("Di2"),
        ScanFilter::Service(SHIFTING_SERVICE_UUID),
    ],
};

/// Profile for a role.
pub fn profile_for(role: DeviceRole) -> &'static ServiceProfile {
    match role {
        DeviceRole::Trainer => &TRAINER_PROFILE,
        DeviceRole::PowerMeter => &POWER_METER_PROFILE,
        DeviceRole::HeartRate => &HEART_RATE_PROFILE,
        DeviceRole::ElectronicShifting => &SHIFTING_PROFILE,
    }
}

/// Scan filters of every role, in role priority order.
pub fn all_filters() -> Vec<ScanFilter> {
    filters_for(&DeviceRole::ALL)
}

/// Union of the given roles' filters, without duplicates.
pub fn filters_for(roles: &[DeviceRole]) -> Vec<ScanFilter> {
    let mut filters = Vec::new();
    for role in roles {
        for filter in profile_for(*role).filters {
            if !filters.contains(filter) {
                filters.push(filter.clone());
            }
        }
    }
    filters
}

/// Role whose primary service is `service`, if any.
pub fn role_for_service(service: &Uuid) -> Option<DeviceRole> {
    DeviceRole::ALL
        .into_iter()
        .find(|role| profile_for(*role).service == *service)
}

/// Role profile that lists a characteristic with this UUID.
pub fn characteristic_for_uuid(role: DeviceRole, uuid: &Uuid) -> Option<CharacteristicKind> {
    if *uuid == BATTERY_LEVEL_UUID {
        return Some(CharacteristicKind::BatteryLevel);
    }
    profile_for(role)
        .characteristics
        .iter()
        .copied()
        .find(|kind| kind.uuid() == *uuid)
}

/// Device Information Service characteristic UUIDs.
pub mod device_information {
    use super::sig_uuid;
    use uuid::Uuid;

    pub const MANUFACTURER_NAME: Uuid = sig_uuid(0x2a29);
    pub const MODEL_NUMBER: Uuid = sig_uuid(0x2a24);
    pub const SERIAL_NUMBER: Uuid = sig_uuid(0x2a25);
    pub const HARDWARE_REVISION: Uuid = sig_uuid(0x2a27);
    pub const FIRMWARE_REVISION: Uuid = sig_uuid(0x2a26);
    pub const SOFTWARE_REVISION: Uuid = sig_uuid(0x2a28);
    pub const PNP_ID: Uuid = sig_uuid(0x2a50);
}
