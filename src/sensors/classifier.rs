//! Device role identification.
//!
//! Strategies run in order until one resolves a role:
//! 1. live GATT services matched against the profile registry
//! 2. advertised name keywords
//! 3. a short-lived connection reading the Device Information Service
//!
//! Every strategy is best-effort. Transport errors are logged and swallowed.

use crate::sensors::decoders::device_info::{decode_string, SHIMANO_VENDOR_ID};
use crate::sensors::decoders::{DeviceInformation, PnpId};
use crate::sensors::profiles::{self, device_information, DEVICE_INFORMATION_SERVICE_UUID};
use crate::sensors::transport::{BleTransport, ServiceHandle};
use crate::sensors::types::DeviceRole;
use async_trait::async_trait;
use uuid::Uuid;

/// What the classifier knows about a device before identifying it.
#[derive(Debug, Clone)]
pub struct ClassifierInput {
    pub peripheral_id: String,
    pub name: Option<String>,
}

/// One identification step.
#[async_trait]
pub trait IdentifyStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    async fn try_identify(
        &self,
        transport: &dyn BleTransport,
        device: &ClassifierInput,
    ) -> Option<DeviceRole>;
}

/// Matches the services of an open GATT link against the registry.
pub struct ServiceStrategy;

#[async_trait]
impl IdentifyStrategy for ServiceStrategy {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn try_identify(
        &self,
        transport: &dyn BleTransport,
        device: &ClassifierInput,
    ) -> Option<DeviceRole> {
        if !transport.is_connected(&device.peripheral_id).await {
            return None;
        }
        let services = match transport.primary_services(&device.peripheral_id).await {
            Ok(services) => services,
            Err(e) => {
                tracing::debug!("Service lookup failed for {}: {}", device.peripheral_id, e);
                return None;
            }
        };
        services.iter().find_map(profiles::role_for_service)
    }
}

/// Name keywords per role, checked in this order.
const NAME_KEYWORDS: [(DeviceRole, &[&str]); 4] = [
    (
        DeviceRole::ElectronicShifting,
        &["shimano", "di2", "ultegra", "dura-ace"],
    ),
    (DeviceRole::HeartRate, &["hr", "heart", "polar", "garmin hrm"]),
    (DeviceRole::PowerMeter, &["power", "stages", "quarq", "srm"]),
    (
        DeviceRole::Trainer,
        &["tacx", "wahoo", "elite", "resistance", "cadence", "csc", "trainer"],
    ),
];

/// Role from advertised name keywords (case-insensitive substring match).
pub fn role_from_name(name: &str) -> Option<DeviceRole> {
    let name = name.to_lowercase();
    NAME_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map(|(role, _)| *role)
}

/// Matches the advertised name against per-role keywords.
pub struct NameStrategy;

#[async_trait]
impl IdentifyStrategy for NameStrategy {
    fn name(&self) -> &'static str {
        "name"
    }

    async fn try_identify(
        &self,
        _transport: &dyn BleTransport,
        device: &ClassifierInput,
    ) -> Option<DeviceRole> {
        device.name.as_deref().and_then(role_from_name)
    }
}

/// Manufacturer keywords per role.
const MANUFACTURER_KEYWORDS: [(DeviceRole, &[&str]); 4] = [
    (DeviceRole::ElectronicShifting, &["shimano"]),
    (DeviceRole::HeartRate, &["polar", "garmin"]),
    (DeviceRole::PowerMeter, &["stages", "quarq", "srm"]),
    (DeviceRole::Trainer, &["tacx", "wahoo", "elite"]),
];

/// Role from Device Information values.
pub fn role_from_device_information(info: &DeviceInformation) -> Option<DeviceRole> {
    let by_manufacturer = info.manufacturer.as_deref().and_then(|manufacturer| {
        let manufacturer = manufacturer.to_lowercase();
        MANUFACTURER_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| manufacturer.contains(k)))
            .map(|(role, _)| *role)
    });

    by_manufacturer.or_else(|| match info.pnp {
        Some(PnpId { vendor_id, .. }) if vendor_id == SHIMANO_VENDOR_ID => {
            Some(DeviceRole::ElectronicShifting)
        }
        _ => None,
    })
}

/// Read every Device Information characteristic the device exposes.
///
/// The link must already be open. Missing characteristics are skipped.
pub async fn read_device_information(
    transport: &dyn BleTransport,
    peripheral: &str,
) -> DeviceInformation {
    let mut info = DeviceInformation::default();

    let service = match transport
        .resolve_service(peripheral, DEVICE_INFORMATION_SERVICE_UUID)
        .await
    {
        Ok(service) => service,
        Err(e) => {
            tracing::debug!("No device information service on {}: {}", peripheral, e);
            return info;
        }
    };

    info.manufacturer =
        read_optional(transport, peripheral, &service, device_information::MANUFACTURER_NAME)
            .await
            .and_then(|v| decode_string(&v));
    info.model =
        read_optional(transport, peripheral, &service, device_information::MODEL_NUMBER)
            .await
            .and_then(|v| decode_string(&v));
    info.serial_number =
        read_optional(transport, peripheral, &service, device_information::SERIAL_NUMBER)
            .await
            .and_then(|v| decode_string(&v));
    info.hardware_revision =
        read_optional(transport, peripheral, &service, device_information::HARDWARE_REVISION)
            .await
            .and_then(|v| decode_string(&v));
    info.firmware_revision =
        read_optional(transport, peripheral, &service, device_information::FIRMWARE_REVISION)
            .await
            .and_then(|v| decode_string(&v));
    info.software_revision =
        read_optional(transport, peripheral, &service, device_information::SOFTWARE_REVISION)
            .await
            .and_then(|v| decode_string(&v));
    info.pnp =
        read_optional(transport, peripheral, &service, device_information::PNP_ID)
            .await
            .and_then(|v| PnpId::parse(&v));

    info
}

async fn read_optional(
    transport: &dyn BleTransport,
    peripheral: &str,
    service: &ServiceHandle,
    uuid: Uuid,
) -> Option<Vec<u8>> {
    let handle = transport
        .resolve_characteristic(peripheral, service, uuid)
        .await
        .ok()?;
    match transport.read(peripheral, &handle).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Reading {} on {} failed: {}", uuid, peripheral, e);
            None
        }
    }
}

/// Opens a short-lived link and inspects the Device Information Service.
pub struct DeviceInfoStrategy;

#[async_trait]
impl IdentifyStrategy for DeviceInfoStrategy {
    fn name(&self) -> &'static str {
        "device information"
    }

    async fn try_identify(
        &self,
        transport: &dyn BleTransport,
        device: &ClassifierInput,
    ) -> Option<DeviceRole> {
        let peripheral = device.peripheral_id.as_str();
        let opened = !transport.is_connected(peripheral).await;

        if opened {
            if let Err(e) = transport.connect(peripheral).await {
                tracing::debug!("Inspection connection to {} failed: {}", peripheral, e);
                return None;
            }
        }

        let info = read_device_information(transport, peripheral).await;

        if opened {
            if let Err(e) = transport.disconnect(peripheral).await {
                tracing::debug!("Closing inspection connection to {} failed: {}", peripheral, e);
            }
        }

        role_from_device_information(&info)
    }
}

/// Ordered chain of identification strategies.
pub struct DeviceClassifier {
    strategies: Vec<Box<dyn IdentifyStrategy>>,
}

impl Default for DeviceClassifier {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(ServiceStrategy),
                Box::new(NameStrategy),
                Box::new(DeviceInfoStrategy),
            ],
        }
    }
}

impl DeviceClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier with a custom strategy chain.
    pub fn with_strategies(strategies: Vec<Box<dyn IdentifyStrategy>>) -> Self {
        Self { strategies }
    }

    /// Identify a device's role, or `None` if every strategy fails.
    pub async fn identify(
        &self,
        transport: &dyn BleTransport,
        device: &ClassifierInput,
    ) -> Option<DeviceRole> {
        for strategy in &self.strategies {
            if let Some(role) = strategy.try_identify(transport, device).await {
                tracing::debug!(
                    "Identified {} as {} by {}",
                    device.peripheral_id,
                    role,
                    strategy.name()
                );
                return Some(role);
            }
        }
        tracing::debug!("Could not identify {}", device.peripheral_id);
        None
    }
}
