//! A live link to one device in one role, and the single attempt that opens it.

use crate::sensors::profiles::{
    self, CharacteristicKind, BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID,
};
use crate::sensors::transport::{BleTransport, CharacteristicHandle, ServiceHandle};
use crate::sensors::types::{ConnectionState, DeviceRole, DiscoveredDevice, SensorError};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// An open connection. Owned by the sensor manager; at most one per device id.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Derived device id (map key)
    pub device_id: String,
    /// Physical peripheral behind the link
    pub peripheral_id: String,
    /// Display name
    pub name: String,
    /// Role this connection serves
    pub role: DeviceRole,
    /// Role's primary service
    pub service: Option<ServiceHandle>,
    /// Resolved characteristics of the role profile
    pub characteristics: BTreeMap<CharacteristicKind, CharacteristicHandle>,
    /// Battery level characteristic, if the device has one
    pub battery: Option<CharacteristicHandle>,
    /// Last known battery percentage
    pub battery_level: Option<u8>,
    /// Characteristics with notifications enabled
    subscribed: Vec<CharacteristicHandle>,
    state: ConnectionState,
    is_streaming: bool,
    /// When the connection reached `Streaming`
    pub connected_at: Option<Instant>,
}

impl Connection {
    pub fn new(device: &DiscoveredDevice) -> Self {
        Self {
            device_id: device.id.clone(),
            peripheral_id: device.peripheral_id.clone(),
            name: device.name.clone(),
            role: device.role,
            service: None,
            characteristics: BTreeMap::new(),
            battery: None,
            battery_level: None,
            subscribed: Vec::new(),
            state: ConnectionState::Disconnected,
            is_streaming: false,
            connected_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                "{}: illegal transition {:?} -> {:?}",
                self.device_id,
                self.state,
                next
            );
            return false;
        }
        tracing::debug!("{}: {} -> {}", self.device_id, self.state, next);
        self.state = next;
        self.is_streaming = next == ConnectionState::Streaming;
        if self.is_streaming && self.connected_at.is_none() {
            self.connected_at = Some(Instant::now());
        }
        true
    }

    /// Which named characteristic a notification UUID belongs to.
    pub fn kind_for_uuid(&self, uuid: &Uuid) -> Option<CharacteristicKind> {
        if self.battery.is_some_and(|b| b.uuid == *uuid) {
            return Some(CharacteristicKind::BatteryLevel);
        }
        self.characteristics
            .iter()
            .find(|(_, handle)| handle.uuid == *uuid)
            .map(|(kind, _)| *kind)
    }

    /// Resolved handles that advertise notify or indicate.
    pub fn notifiable(&self) -> Vec<CharacteristicHandle> {
        self.characteristics
            .values()
            .chain(self.battery.iter())
            .filter(|handle| handle.properties.can_notify())
            .copied()
            .collect()
    }

    /// Handles currently subscribed.
    pub fn subscribed(&self) -> &[CharacteristicHandle] {
        &self.subscribed
    }

    /// Writable control characteristic for a command, or why it is unusable.
    pub fn control_handle(
        &self,
        role: DeviceRole,
        kind: CharacteristicKind,
    ) -> Result<CharacteristicHandle, SensorError> {
        if self.role != role {
            return Err(SensorError::ControlWriteFailed(format!(
                "{} is a {}, not a {}",
                self.device_id, self.role, role
            )));
        }
        if self.state != ConnectionState::Streaming {
            return Err(SensorError::ControlWriteFailed(format!(
                "{} is not streaming ({})",
                self.device_id, self.state
            )));
        }
        match self.characteristics.get(&kind) {
            Some(handle) if handle.properties.can_write() => Ok(*handle),
            Some(_) => Err(SensorError::ControlWriteFailed(format!(
                "{} is not writable on {}",
                kind, self.device_id
            ))),
            None => Err(SensorError::ControlWriteFailed(format!(
                "{} has no {}",
                self.device_id, kind
            ))),
        }
    }

    /// Enable notifications on every notifiable characteristic.
    ///
    /// Individual failures are logged. Fails when nothing ends up subscribed,
    /// including when no resolved characteristic can notify.
    pub async fn subscribe_all(&mut self, transport: &dyn BleTransport) -> Result<(), SensorError> {
        let candidates = self.notifiable();
        let mut failures = Vec::new();

        for handle in &candidates {
            if self.subscribed.contains(handle) {
                continue;
            }
            match transport.subscribe(&self.peripheral_id, handle).await {
                Ok(()) => {
                    tracing::debug!("{}: subscribed to {}", self.device_id, handle.uuid);
                    self.subscribed.push(*handle);
                }
                Err(e) => {
                    tracing::warn!(
                        "{}: failed to subscribe to {}: {}",
                        self.device_id,
                        handle.uuid,
                        e
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if self.subscribed.is_empty() {
            if candidates.is_empty() {
                return Err(SensorError::SubscriptionFailed(format!(
                    "{} has no notifiable characteristics",
                    self.device_id
                )));
            }
            return Err(SensorError::SubscriptionFailed(failures.join("; ")));
        }
        Ok(())
    }

    /// Disable every subscription. Failures are logged, never propagated.
    pub async fn unsubscribe_all(&mut self, transport: &dyn BleTransport) {
        for handle in std::mem::take(&mut self.subscribed) {
            if let Err(e) = transport.unsubscribe(&self.peripheral_id, &handle).await {
                tracing::warn!(
                    "{}: failed to unsubscribe from {}: {}",
                    self.device_id,
                    handle.uuid,
                    e
                );
            }
        }
    }

    /// Forget subscriptions without touching the link (it is already gone).
    pub fn drop_link(&mut self) {
        self.subscribed.clear();
        self.transition(ConnectionState::Disconnected);
    }
}

/// Run one connection attempt for `device`.
///
/// On failure the link is closed again unless `link_shared` says another
/// connection still uses it.
pub async fn establish(
    transport: &dyn BleTransport,
    device: &DiscoveredDevice,
    timeout: Duration,
    link_shared: bool,
) -> Result<Connection, SensorError> {
    let mut connection = Connection::new(device);

    match open(transport, &mut connection, timeout).await {
        Ok(()) => Ok(connection),
        Err(e) => {
            connection.transition(ConnectionState::Disconnected);
            if !link_shared {
                if let Err(close) = transport.disconnect(&device.peripheral_id).await {
                    tracing::debug!(
                        "{}: closing link after failed attempt: {}",
                        device.id,
                        close
                    );
                }
            }
            Err(e)
        }
    }
}

async fn open(
    transport: &dyn BleTransport,
    connection: &mut Connection,
    timeout: Duration,
) -> Result<(), SensorError> {
    let peripheral = connection.peripheral_id.clone();
    let profile = profiles::profile_for(connection.role);

    connection.transition(ConnectionState::Connecting);
    tokio::time::timeout(timeout, transport.connect(&peripheral))
        .await
        .map_err(|_| SensorError::ConnectionTimeout(timeout))??;

    connection.transition(ConnectionState::ServiceResolving);
    let service = transport
        .resolve_service(&peripheral, profile.service)
        .await
        .map_err(|e| {
            tracing::warn!("{}: service {} unavailable: {}", connection.device_id, profile.service, e);
            SensorError::ServiceUnavailable(profile.service)
        })?;
    connection.service = Some(service);

    for kind in profile.characteristics {
        match transport
            .resolve_characteristic(&peripheral, &service, kind.uuid())
            .await
        {
            Ok(handle) => {
                tracing::debug!("{}: resolved {}", connection.device_id, kind);
                connection.characteristics.insert(*kind, handle);
            }
            Err(e) => {
                tracing::warn!("{}: skipping {}: {}", connection.device_id, kind, e);
            }
        }
    }

    connection.battery = resolve_battery(transport, &peripheral).await;
    if connection.battery.is_none() {
        tracing::debug!("{}: no battery service", connection.device_id);
    }

    if connection.characteristics.is_empty() {
        return Err(SensorError::NoCharacteristicsResolved(format!(
            "{} exposes none of the {} characteristics",
            connection.device_id, connection.role
        )));
    }

    connection.transition(ConnectionState::Subscribing);
    connection.subscribe_all(transport).await?;
    connection.transition(ConnectionState::Streaming);

    tracing::info!(
        "{}: streaming {} characteristic(s) as {}",
        connection.device_id,
        connection.subscribed().len(),
        connection.role
    );
    Ok(())
}

async fn resolve_battery(
    transport: &dyn BleTransport,
    peripheral: &str,
) -> Option<CharacteristicHandle> {
    let service = transport
        .resolve_service(peripheral, BATTERY_SERVICE_UUID)
        .await
        .ok()?;
    transport
        .resolve_characteristic(peripheral, &service, BATTERY_LEVEL_UUID)
        .await
        .ok()
}
