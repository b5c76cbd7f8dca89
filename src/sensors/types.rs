//! Core sensor types: device roles, connection states, events and errors.

use crate::sensors::aggregator::CanonicalSample;
use crate::sensors::decoders::DecodeError;
use crate::sensors::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Logical role a physical peripheral plays, independent of vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Smart trainer (FTMS)
    Trainer,
    /// Standalone power meter (Cycling Power Service)
    PowerMeter,
    /// Heart rate strap or band
    HeartRate,
    /// Electronic shifting unit (vendor protocol)
    ElectronicShifting,
}

impl DeviceRole {
    /// All roles in discovery priority order.
    pub const ALL: [DeviceRole; 4] = [
        DeviceRole::Trainer,
        DeviceRole::PowerMeter,
        DeviceRole::HeartRate,
        DeviceRole::ElectronicShifting,
    ];

    /// Stable identifier used when composing multi-role device ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Trainer => "trainer",
            DeviceRole::PowerMeter => "power_meter",
            DeviceRole::HeartRate => "heart_rate",
            DeviceRole::ElectronicShifting => "electronic_shifting",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Trainer => write!(f, "Smart Trainer"),
            DeviceRole::PowerMeter => write!(f, "Power Meter"),
            DeviceRole::HeartRate => write!(f, "Heart Rate"),
            DeviceRole::ElectronicShifting => write!(f, "Electronic Shifting"),
        }
    }
}

/// Connection state of a device.
///
/// `Disconnected -> Connecting -> ServiceResolving -> Subscribing -> Streaming`.
/// Any state may drop to `Disconnected`. `Streaming -> Subscribing` is used when
/// streaming is paused on a live link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link
    #[default]
    Disconnected,
    /// GATT connect in flight
    Connecting,
    /// Resolving the role's service and characteristics
    ServiceResolving,
    /// Characteristics resolved, notifications being enabled
    Subscribing,
    /// Notifications flowing
    Streaming,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, ServiceResolving)
                | (ServiceResolving, Subscribing)
                | (Subscribing, Streaming)
                | (Streaming, Subscribing)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::ServiceResolving => write!(f, "Resolving services..."),
            ConnectionState::Subscribing => write!(f, "Subscribing..."),
            ConnectionState::Streaming => write!(f, "Streaming"),
        }
    }
}

/// A device found by a scan, resolved to one role.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Derived id: the peripheral id, or `<peripheral>_<role>` for smart discovery entries
    pub id: String,
    /// Physical peripheral handle shared by all entries of the same device
    pub peripheral_id: String,
    /// Advertised name
    pub name: String,
    /// Resolved role
    pub role: DeviceRole,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// Set once a connection to this entry has succeeded
    pub paired: bool,
    /// When the device was last seen
    pub last_seen: Instant,
}

/// Events published by the sensor layer.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// A scan request was issued
    ScanStarted,
    /// A scan request finished
    ScanStopped,
    /// A device was added to (or replaced in) the discovered list
    Discovered(DiscoveredDevice),
    /// A device reached `Streaming`
    Connected {
        device_id: String,
        role: DeviceRole,
        name: String,
    },
    /// A device connection was discarded
    Disconnected {
        device_id: String,
        role: DeviceRole,
        name: String,
        unexpected: bool,
    },
    /// Auto-recovery is about to reconnect a dropped device
    Reconnecting { device_id: String },
    /// All connection attempts failed
    ConnectionError { device_id: String, reason: String },
    /// A new merged sample
    Sample(CanonicalSample),
    /// A ride session started
    SessionStarted,
    /// A ride session stopped
    SessionStopped,
}

/// Runtime configuration for the sensor layer.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Cap on a single GATT connect call
    pub connection_timeout: Duration,
    /// Connection attempts before giving up
    pub max_connect_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_base_delay`
    pub retry_base_delay: Duration,
    /// How long a platform scan listens before choosing a device
    pub scan_window: Duration,
    /// Reconnect after an unexpected disconnect
    pub auto_reconnect: bool,
}

impl SensorConfig {
    /// Backoff before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_base_delay * attempt
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            scan_window: Duration::from_secs(10),
            auto_reconnect: false,
        }
    }
}

/// Errors that can occur in the sensor layer.
#[derive(Debug, Error)]
pub enum SensorError {
    /// No Bluetooth capability on this host
    #[error("Bluetooth is not supported on this platform")]
    UnsupportedPlatform,

    /// No device chosen, no roles requested, or the request was refused
    #[error("Scan rejected: {0}")]
    ScanRejected(String),

    /// Device id not present in the discovered list
    #[error("Device not found: {0}, scan again")]
    DeviceNotFound(String),

    /// A connection already exists for this id
    #[error("Device already connected: {0}")]
    AlreadyConnected(String),

    /// No active connection for this id
    #[error("Device not connected: {0}")]
    NotConnected(String),

    /// GATT connect did not complete in time
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The role's primary service is missing on the device
    #[error("Service {0} unavailable on device")]
    ServiceUnavailable(uuid::Uuid),

    /// None of the role's characteristics could be resolved
    #[error("No characteristics resolved: {0}")]
    NoCharacteristicsResolved(String),

    /// Notifications could not be enabled on any characteristic
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Host signaled link loss
    #[error("Device disconnected unexpectedly: {0}")]
    UnexpectedDisconnect(String),

    /// Role mismatch, missing control characteristic, or rejected write
    #[error("Control write failed: {0}")]
    ControlWriteFailed(String),

    /// Payload shorter than a mandatory field
    #[error(transparent)]
    DecodeTruncated(#[from] DecodeError),

    /// Platform transport failure
    #[error("BLE error: {0}")]
    Transport(#[from] TransportError),
}

impl SensorError {
    /// Whether the connection retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SensorError::ConnectionTimeout(_)
                | SensorError::ServiceUnavailable(_)
                | SensorError::NoCharacteristicsResolved(_)
                | SensorError::SubscriptionFailed(_)
                | SensorError::Transport(_)
        )
    }
}
