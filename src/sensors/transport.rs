//! Platform Bluetooth capability consumed by the sensor layer.
//!
//! The connection manager, classifier and discovery orchestrator never touch a
//! platform BLE stack directly. They call into a [`BleTransport`], which is
//! injected at construction time. [`crate::sensors::btle::BtleplugTransport`]
//! drives real hardware; [`crate::sensors::fake::FakeTransport`] is scripted.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

/// Opaque platform handle for a physical peripheral.
pub type PeripheralId = String;

/// One predicate of a scan request. A device matches a request when it
/// matches any of its filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    /// Device advertises this service
    Service(Uuid),
    /// Device name starts with this prefix
    NamePrefix(&'static str),
}

impl ScanFilter {
    /// Check an advertisement against this filter.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        match self {
            ScanFilter::Service(uuid) => services.contains(uuid),
            ScanFilter::NamePrefix(prefix) => name.is_some_and(|n| n.starts_with(prefix)),
        }
    }
}

/// Parameters of a platform scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Any-of filters
    pub filters: Vec<ScanFilter>,
    /// Services the caller wants access to after connecting
    pub optional_services: Vec<Uuid>,
}

/// The device a scan settled on.
#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

/// A resolved GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandle {
    pub uuid: Uuid,
}

/// Capabilities a characteristic advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Whether the characteristic can push values to us.
    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }

    /// Whether the characteristic accepts writes.
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A resolved GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Asynchronous events pushed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A characteristic value notification
    Notification {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The platform lost the link to a peripheral
    Disconnected { peripheral: PeripheralId },
}

/// Errors reported by a transport backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Peripheral, service or characteristic does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation needs an open GATT link
    #[error("Peripheral not connected: {0}")]
    NotConnected(String),

    /// The platform or user refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Any other platform failure
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Host platform Bluetooth capability.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan using the given filters and return the chosen device.
    async fn request_device(&self, request: &ScanRequest) -> Result<ScannedDevice, TransportError>;

    /// Open the GATT link.
    async fn connect(&self, peripheral: &str) -> Result<(), TransportError>;

    /// Close the GATT link.
    async fn disconnect(&self, peripheral: &str) -> Result<(), TransportError>;

    /// Whether the GATT link is currently open.
    async fn is_connected(&self, peripheral: &str) -> bool;

    /// Primary services exposed by a connected peripheral.
    async fn primary_services(&self, peripheral: &str) -> Result<Vec<Uuid>, TransportError>;

    async fn resolve_service(
        &self,
        peripheral: &str,
        service: Uuid,
    ) -> Result<ServiceHandle, TransportError>;

    async fn resolve_characteristic(
        &self,
        peripheral: &str,
        service: &ServiceHandle,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle, TransportError>;

    async fn read(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError>;

    /// Take the platform event stream. Backends hand it out once; later calls
    /// return an empty stream.
    fn events(&self) -> BoxStream<'static, TransportEvent>;
}
