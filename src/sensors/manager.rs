//! Sensor manager: discovery, connections, control writes and the sample
//! stream.
//!
//! All state lives behind `&mut self`, so every mutation happens on the
//! caller's task between suspension points. Transport events (notifications
//! and link losses) are processed by [`SensorManager::pump`].

use crate::sensors::aggregator::{CanonicalSample, SampleAggregator};
use crate::sensors::classifier;
use crate::sensors::connection::{establish, Connection};
use crate::sensors::decoders::cycling_power::{build_calibrate, build_reset_cumulative_value};
use crate::sensors::decoders::ftms::{build_reset, build_set_target_power};
use crate::sensors::decoders::shifting::{build_shift, Derailleur, ShiftDirection};
use crate::sensors::decoders::{self, DeviceInformation};
use crate::sensors::discovery::DiscoveryOrchestrator;
use crate::sensors::profiles::CharacteristicKind;
use crate::sensors::transport::{BleTransport, TransportEvent};
use crate::sensors::types::{
    ConnectionState, DeviceRole, DiscoveredDevice, SensorConfig, SensorError, SensorEvent,
};
use crossbeam::channel::{Receiver, Sender};
use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Manages BLE sensor discovery, connection, and data streaming.
pub struct SensorManager<T: BleTransport + 'static> {
    /// Platform Bluetooth capability
    transport: Arc<T>,
    /// Configuration
    config: SensorConfig,
    /// Discovered-device list
    discovery: DiscoveryOrchestrator,
    /// Open connections (device_id -> Connection)
    connections: HashMap<String, Connection>,
    /// Canonical sample
    aggregator: SampleAggregator,
    /// Channel for sending sensor events
    event_tx: Option<Sender<SensorEvent>>,
    /// Notifications and link losses from the transport
    transport_events: BoxStream<'static, TransportEvent>,
    /// Whether a ride session is running
    session_active: bool,
}

impl<T: BleTransport + 'static> SensorManager<T> {
    /// Create a new sensor manager on top of a transport.
    pub fn new(transport: Arc<T>, config: SensorConfig) -> Self {
        let transport_events = transport.events();
        Self {
            discovery: DiscoveryOrchestrator::new(config.connection_timeout),
            transport,
            config,
            connections: HashMap::new(),
            aggregator: SampleAggregator::new(),
            event_tx: None,
            transport_events,
            session_active: false,
        }
    }

    /// Create a new sensor manager with default configuration.
    pub fn with_defaults(transport: Arc<T>) -> Self {
        Self::new(transport, SensorConfig::default())
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Get an event receiver for sensor events.
    pub fn event_receiver(&mut self) -> Receiver<SensorEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Send an event if the channel is available.
    fn send_event(&self, event: SensorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    // ---- Discovery -------------------------------------------------------

    /// Scan for a device of one role.
    pub async fn scan(&mut self, role: DeviceRole) -> Result<DiscoveredDevice, SensorError> {
        tracing::info!("Scanning for {}", role);
        self.send_event(SensorEvent::ScanStarted);
        let result = self.discovery.scan(&*self.transport, role).await;
        self.send_event(SensorEvent::ScanStopped);

        let device = result?;
        self.send_event(SensorEvent::Discovered(device.clone()));
        Ok(device)
    }

    /// Scan for one device matching any of `roles`; the first supported role
    /// in priority order wins.
    pub async fn scan_multiple(
        &mut self,
        roles: &[DeviceRole],
    ) -> Result<DiscoveredDevice, SensorError> {
        tracing::info!("Scanning for any of {:?}", roles);
        self.send_event(SensorEvent::ScanStarted);
        let result = self.discovery.scan_multiple(&*self.transport, roles).await;
        self.send_event(SensorEvent::ScanStopped);

        let device = result?;
        self.send_event(SensorEvent::Discovered(device.clone()));
        Ok(device)
    }

    /// Scan for one device and record an entry for every role it supports.
    pub async fn smart_discover(
        &mut self,
        roles: &[DeviceRole],
    ) -> Result<Vec<DiscoveredDevice>, SensorError> {
        tracing::info!("Smart discovery for {:?}", roles);
        self.send_event(SensorEvent::ScanStarted);
        let result = self.discovery.smart_discover(&*self.transport, roles).await;
        self.send_event(SensorEvent::ScanStopped);

        let devices = result?;
        for device in &devices {
            self.send_event(SensorEvent::Discovered(device.clone()));
        }
        Ok(devices)
    }

    /// Get list of discovered devices.
    pub fn discovered(&self) -> &[DiscoveredDevice] {
        self.discovery.discovered()
    }

    pub fn clear_discovered(&mut self) {
        self.discovery.clear();
    }

    // ---- Connections -----------------------------------------------------

    /// Connect to a discovered device, retrying with linear backoff.
    pub async fn connect(&mut self, device_id: &str) -> Result<(), SensorError> {
        if self.connections.contains_key(device_id) {
            return Err(SensorError::AlreadyConnected(device_id.to_string()));
        }
        let device = self
            .discovery
            .find(device_id)
            .cloned()
            .ok_or_else(|| SensorError::DeviceNotFound(device_id.to_string()))?;

        self.connect_device(device).await
    }

    async fn connect_device(&mut self, device: DiscoveredDevice) -> Result<(), SensorError> {
        let attempts = self.config.max_connect_attempts.max(1);
        let mut failures = Vec::new();
        let mut last_error = None;

        for attempt in 1..=attempts {
            tracing::info!(
                "Connecting to {} as {} (attempt {}/{})",
                device.id,
                device.role,
                attempt,
                attempts
            );

            let link_shared = self.link_in_use(&device.peripheral_id);
            match establish(
                &*self.transport,
                &device,
                self.config.connection_timeout,
                link_shared,
            )
            .await
            {
                Ok(connection) => {
                    self.connections.insert(device.id.clone(), connection);
                    self.discovery.mark_paired(&device.id);
                    tracing::info!("Connected to {} ({})", device.name, device.id);
                    self.send_event(SensorEvent::Connected {
                        device_id: device.id.clone(),
                        role: device.role,
                        name: device.name.clone(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Attempt {} for {} failed: {}", attempt, device.id, e);
                    failures.push(format!("attempt {}: {}", attempt, e));
                    let retryable = e.is_retryable();
                    last_error = Some(e);

                    if !retryable {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff_for(attempt)).await;
                    }
                }
            }
        }

        let reason = failures.join("; ");
        tracing::error!("Giving up on {}: {}", device.id, reason);
        self.send_event(SensorEvent::ConnectionError {
            device_id: device.id.clone(),
            reason: reason.clone(),
        });
        Err(last_error.unwrap_or(SensorError::NoCharacteristicsResolved(reason)))
    }

    /// Whether another connection uses this physical link.
    fn link_in_use(&self, peripheral: &str) -> bool {
        self.connections
            .values()
            .any(|c| c.peripheral_id == peripheral)
    }

    /// Disconnect from a device.
    pub async fn disconnect(&mut self, device_id: &str) -> Result<(), SensorError> {
        let mut connection = self
            .connections
            .remove(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;

        tracing::info!("Disconnecting from {}", device_id);

        connection.unsubscribe_all(&*self.transport).await;
        if !self.link_in_use(&connection.peripheral_id) {
            if let Err(e) = self.transport.disconnect(&connection.peripheral_id).await {
                tracing::warn!("Closing link to {} failed: {}", connection.peripheral_id, e);
            }
        }
        connection.transition(ConnectionState::Disconnected);

        self.send_event(SensorEvent::Disconnected {
            device_id: connection.device_id,
            role: connection.role,
            name: connection.name,
            unexpected: false,
        });
        self.reset_if_idle();
        Ok(())
    }

    /// Disconnect every device concurrently. Individual failures are logged
    /// and every connection is discarded.
    pub async fn disconnect_all(&mut self) {
        let mut connections: Vec<Connection> =
            self.connections.drain().map(|(_, c)| c).collect();
        if connections.is_empty() {
            return;
        }
        tracing::info!("Disconnecting {} device(s)", connections.len());

        let transport: &dyn BleTransport = &*self.transport;
        join_all(connections.iter_mut().map(|c| c.unsubscribe_all(transport))).await;

        let peripherals: BTreeSet<&str> = connections
            .iter()
            .map(|c| c.peripheral_id.as_str())
            .collect();
        let results = join_all(peripherals.iter().map(|p| transport.disconnect(p))).await;
        for (peripheral, result) in peripherals.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Closing link to {} failed: {}", peripheral, e);
            }
        }

        for mut connection in connections {
            connection.transition(ConnectionState::Disconnected);
            self.send_event(SensorEvent::Disconnected {
                device_id: connection.device_id,
                role: connection.role,
                name: connection.name,
                unexpected: false,
            });
        }
        self.aggregator.reset();
    }

    /// Re-enable notifications on a paused connection.
    pub async fn start_streaming(&mut self, device_id: &str) -> Result<(), SensorError> {
        let transport: &dyn BleTransport = &*self.transport;
        let connection = self
            .connections
            .get_mut(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;

        match connection.state() {
            ConnectionState::Streaming => Ok(()),
            ConnectionState::Subscribing => {
                connection.subscribe_all(transport).await?;
                connection.transition(ConnectionState::Streaming);
                tracing::info!("Resumed streaming from {}", device_id);
                Ok(())
            }
            _ => Err(SensorError::NotConnected(device_id.to_string())),
        }
    }

    /// Pause notifications while keeping the link open.
    pub async fn stop_streaming(&mut self, device_id: &str) -> Result<(), SensorError> {
        let transport: &dyn BleTransport = &*self.transport;
        let connection = self
            .connections
            .get_mut(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;

        if connection.state() == ConnectionState::Streaming {
            connection.unsubscribe_all(transport).await;
            connection.transition(ConnectionState::Subscribing);
            tracing::info!("Paused streaming from {}", device_id);
        }
        Ok(())
    }

    pub fn is_device_connected(&self, device_id: &str) -> bool {
        self.connections.contains_key(device_id)
    }

    pub fn connection(&self, device_id: &str) -> Option<&Connection> {
        self.connections.get(device_id)
    }

    /// Open connections, ordered by device id.
    pub fn connected_devices(&self) -> Vec<&Connection> {
        let mut connections: Vec<&Connection> = self.connections.values().collect();
        connections.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        connections
    }

    // ---- Control ---------------------------------------------------------

    async fn write_control(
        &self,
        device_id: &str,
        role: DeviceRole,
        kind: CharacteristicKind,
        command: &[u8],
    ) -> Result<(), SensorError> {
        let connection = self
            .connections
            .get(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;
        let handle = connection.control_handle(role, kind)?;

        self.transport
            .write(&connection.peripheral_id, &handle, command)
            .await
            .map_err(|e| SensorError::ControlWriteFailed(e.to_string()))?;

        tracing::debug!("Wrote {:02X?} to {} on {}", command, kind, device_id);
        Ok(())
    }

    /// Set target power for ERG mode.
    pub async fn set_target_power(
        &self,
        device_id: &str,
        target_watts: u16,
    ) -> Result<(), SensorError> {
        self.write_control(
            device_id,
            DeviceRole::Trainer,
            CharacteristicKind::FitnessMachineControlPoint,
            &build_set_target_power(target_watts),
        )
        .await?;
        tracing::info!("Set target power to {}W", target_watts);
        Ok(())
    }

    /// Move a derailleur one gear.
    pub async fn shift_gear(
        &self,
        device_id: &str,
        direction: ShiftDirection,
        derailleur: Derailleur,
    ) -> Result<(), SensorError> {
        self.write_control(
            device_id,
            DeviceRole::ElectronicShifting,
            CharacteristicKind::ShifterControl,
            &build_shift(derailleur, direction),
        )
        .await?;
        tracing::info!("Shifted {:?} {:?}", derailleur, direction);
        Ok(())
    }

    /// Start a power meter zero-offset calibration.
    pub async fn calibrate(&self, device_id: &str) -> Result<(), SensorError> {
        self.write_control(
            device_id,
            DeviceRole::PowerMeter,
            CharacteristicKind::CyclingPowerControlPoint,
            &build_calibrate(),
        )
        .await?;
        tracing::info!("Calibration started on {}", device_id);
        Ok(())
    }

    /// Reset a trainer or the cumulative counters of a power meter.
    pub async fn reset_device_data(&self, device_id: &str) -> Result<(), SensorError> {
        let role = self
            .connections
            .get(device_id)
            .map(|c| c.role)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;

        let (kind, command) = match role {
            DeviceRole::Trainer => (CharacteristicKind::FitnessMachineControlPoint, build_reset()),
            DeviceRole::PowerMeter => (
                CharacteristicKind::CyclingPowerControlPoint,
                build_reset_cumulative_value(),
            ),
            other => {
                return Err(SensorError::ControlWriteFailed(format!(
                    "{} has no resettable data",
                    other
                )))
            }
        };

        self.write_control(device_id, role, kind, &command).await?;
        tracing::info!("Reset data on {}", device_id);
        Ok(())
    }

    // ---- Device information ----------------------------------------------

    /// Read the battery level of a connected device, if it has one.
    pub async fn read_battery_level(&mut self, device_id: &str) -> Result<Option<u8>, SensorError> {
        let transport: &dyn BleTransport = &*self.transport;
        let connection = self
            .connections
            .get_mut(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;

        let Some(handle) = connection.battery else {
            return Ok(None);
        };
        let value = transport.read(&connection.peripheral_id, &handle).await?;
        connection.battery_level = value.first().copied();
        Ok(connection.battery_level)
    }

    /// Read the Device Information Service of a connected device.
    pub async fn read_device_information(
        &self,
        device_id: &str,
    ) -> Result<DeviceInformation, SensorError> {
        let connection = self
            .connections
            .get(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;
        Ok(classifier::read_device_information(&*self.transport, &connection.peripheral_id).await)
    }

    // ---- Samples and sessions --------------------------------------------

    /// Most recent canonical sample.
    pub fn latest_sample(&self) -> &CanonicalSample {
        self.aggregator.latest()
    }

    /// Start a ride session with a fresh canonical sample.
    pub fn start_session(&mut self) {
        self.aggregator.reset();
        self.session_active = true;
        tracing::info!("Session started");
        self.send_event(SensorEvent::SessionStarted);
    }

    pub fn stop_session(&mut self) {
        self.session_active = false;
        tracing::info!("Session stopped");
        self.send_event(SensorEvent::SessionStopped);
    }

    pub fn is_session_active(&self) -> bool {
        self.session_active
    }

    fn reset_if_idle(&mut self) {
        if self.connections.is_empty() {
            self.aggregator.reset();
        }
    }

    // ---- Event processing ------------------------------------------------

    /// Wait for the next transport event and process it. Returns `false`
    /// once the transport stream has ended.
    pub async fn pump(&mut self) -> bool {
        match self.transport_events.next().await {
            Some(event) => {
                self.handle_transport_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Process every transport event that is already queued.
    pub async fn pump_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(Some(event)) = self.transport_events.next().now_or_never() {
            self.handle_transport_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Process one transport event.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Notification {
                peripheral,
                characteristic,
                value,
            } => self.handle_notification(&peripheral, characteristic, &value),
            TransportEvent::Disconnected { peripheral } => {
                self.handle_link_loss(&peripheral).await
            }
        }
    }

    fn handle_notification(&mut self, peripheral: &str, characteristic: uuid::Uuid, value: &[u8]) {
        let mut partials = Vec::new();

        for connection in self.connections.values_mut() {
            if connection.peripheral_id != peripheral || !connection.is_streaming() {
                continue;
            }
            let Some(kind) = connection.kind_for_uuid(&characteristic) else {
                continue;
            };

            match decoders::decode(connection.role, kind, value) {
                Ok(partial) => {
                    if let Some(level) = partial.battery_level {
                        connection.battery_level = Some(level);
                    }
                    if !partial.is_empty() {
                        partials.push((connection.device_id.clone(), partial));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} sample from {}: {}",
                        kind,
                        connection.device_id,
                        SensorError::from(e)
                    );
                }
            }
        }

        for (device_id, partial) in partials {
            let sample = self.aggregator.merge(&device_id, partial);
            self.send_event(SensorEvent::Sample(sample));
        }
    }

    async fn handle_link_loss(&mut self, peripheral: &str) {
        // Stale report of a link we closed ourselves and have since reopened
        if self.transport.is_connected(peripheral).await {
            tracing::debug!("Ignoring disconnect of {}: link is open", peripheral);
            return;
        }

        let lost: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.peripheral_id == peripheral)
            .map(|c| c.device_id.clone())
            .collect();

        let mut dropped = Vec::new();
        for device_id in lost {
            let Some(mut connection) = self.connections.remove(&device_id) else {
                continue;
            };
            connection.drop_link();
            tracing::warn!("{}", SensorError::UnexpectedDisconnect(device_id.clone()));

            self.send_event(SensorEvent::Disconnected {
                device_id: device_id.clone(),
                role: connection.role,
                name: connection.name.clone(),
                unexpected: true,
            });
            dropped.push(self.device_for(&connection));
        }
        self.reset_if_idle();

        if !self.config.auto_reconnect {
            return;
        }
        for device in dropped {
            tracing::info!("Reconnecting to {}", device.id);
            self.send_event(SensorEvent::Reconnecting {
                device_id: device.id.clone(),
            });
            if let Err(e) = self.connect_device(device).await {
                tracing::warn!("Reconnect failed: {}", e);
            }
        }
    }

    fn device_for(&self, connection: &Connection) -> DiscoveredDevice {
        self.discovery
            .find(&connection.device_id)
            .cloned()
            .unwrap_or_else(|| DiscoveredDevice {
                id: connection.device_id.clone(),
                peripheral_id: connection.peripheral_id.clone(),
                name: connection.name.clone(),
                role: connection.role,
                signal_strength: None,
                paired: true,
                last_seen: Instant::now(),
            })
    }

    /// Shutdown the sensor manager.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down SensorManager");
        self.disconnect_all().await;
    }
}
