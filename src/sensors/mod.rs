//! Sensor module for BLE fitness device communication.

pub mod aggregator;
pub mod btle;
pub mod classifier;
pub mod connection;
pub mod decoders;
pub mod discovery;
pub mod fake;
pub mod manager;
pub mod profiles;
pub mod transport;
pub mod types;

pub use aggregator::{CanonicalSample, SampleAggregator};
pub use btle::BtleplugTransport;
pub use classifier::{ClassifierInput, DeviceClassifier, IdentifyStrategy};
pub use connection::Connection;
pub use decoders::shifting::{Derailleur, ShiftDirection};
pub use decoders::{DecodeError, DeviceInformation, PartialSample, RoleDetail};
pub use discovery::DiscoveryOrchestrator;
pub use fake::{FakePeripheral, FakeTransport};
pub use manager::SensorManager;
pub use profiles::{CharacteristicKind, ServiceProfile};
pub use transport::{BleTransport, TransportError, TransportEvent};
pub use types::{
    ConnectionState, DeviceRole, DiscoveredDevice, SensorConfig, SensorError, SensorEvent,
};
