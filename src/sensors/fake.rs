//! Scripted in-memory transport.
//!
//! Drives the whole sensor layer without hardware: peripherals are declared
//! up front, failures are scripted per peripheral, and tests push
//! notifications or link losses through [`FakeTransport::notify`] and
//! [`FakeTransport::drop_link`].

use crate::sensors::profiles::{
    self, device_information, CharacteristicKind, BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID,
    DEVICE_INFORMATION_SERVICE_UUID,
};
use crate::sensors::transport::{
    BleTransport, CharacteristicHandle, CharacteristicProperties, ScanRequest, ScannedDevice,
    ServiceHandle, TransportError, TransportEvent,
};
use crate::sensors::types::DeviceRole;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A scripted peripheral.
#[derive(Debug, Clone, Default)]
pub struct FakePeripheral {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Service -> characteristics with their properties
    pub services: BTreeMap<Uuid, Vec<(Uuid, CharacteristicProperties)>>,
    /// Readable characteristic values
    pub values: HashMap<Uuid, Vec<u8>>,
    /// Connect calls that fail before one succeeds
    pub connect_failures: u32,
    /// Connect never completes
    pub hang_on_connect: bool,
    /// Every subscribe call fails
    pub fail_subscribe: bool,
    /// Every unsubscribe call fails
    pub fail_unsubscribe: bool,
    /// Whether scans can see the device
    pub hidden: bool,
}

const NOTIFY: CharacteristicProperties = CharacteristicProperties {
    read: false,
    write: false,
    write_without_response: false,
    notify: true,
    indicate: false,
};

const READ: CharacteristicProperties = CharacteristicProperties {
    read: true,
    write: false,
    write_without_response: false,
    notify: false,
    indicate: false,
};

const CONTROL: CharacteristicProperties = CharacteristicProperties {
    read: false,
    write: true,
    write_without_response: false,
    notify: false,
    indicate: true,
};

/// Properties a real device would typically give a characteristic.
pub fn typical_properties(kind: CharacteristicKind) -> CharacteristicProperties {
    use CharacteristicKind::*;
    match kind {
        FitnessMachineControlPoint
        | CyclingPowerControlPoint
        | HeartRateControlPoint
        | ShifterControl => CONTROL,
        FitnessMachineFeature
        | SupportedResistanceLevelRange
        | CyclingPowerFeature
        | SensorLocation
        | CscFeature
        | BodySensorLocation => READ,
        BatteryLevel => CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        },
        _ => NOTIFY,
    }
}

impl FakePeripheral {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rssi: Some(-60),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add a service with explicit characteristics.
    pub fn with_service(
        mut self,
        service: Uuid,
        characteristics: &[(Uuid, CharacteristicProperties)],
    ) -> Self {
        self.services
            .entry(service)
            .or_default()
            .extend_from_slice(characteristics);
        self
    }

    /// Add a role's primary service with the given characteristics of its
    /// profile.
    pub fn with_characteristics(self, role: DeviceRole, kinds: &[CharacteristicKind]) -> Self {
        let service = profiles::profile_for(role).service;
        let characteristics: Vec<_> = kinds
            .iter()
            .map(|kind| (kind.uuid(), typical_properties(*kind)))
            .collect();
        self.with_service(service, &characteristics)
    }

    /// Add a role's primary service with every characteristic of its profile.
    pub fn with_role(self, role: DeviceRole) -> Self {
        self.with_characteristics(role, profiles::profile_for(role).characteristics)
    }

    pub fn with_battery(mut self, level: u8) -> Self {
        self.values.insert(BATTERY_LEVEL_UUID, vec![level]);
        self.with_service(
            BATTERY_SERVICE_UUID,
            &[(BATTERY_LEVEL_UUID, typical_properties(CharacteristicKind::BatteryLevel))],
        )
    }

    /// Add a Device Information Service with a manufacturer name and an
    /// optional raw PnP ID value.
    pub fn with_device_information(mut self, manufacturer: &str, pnp: Option<[u8; 7]>) -> Self {
        self.values.insert(
            device_information::MANUFACTURER_NAME,
            manufacturer.as_bytes().to_vec(),
        );
        let mut characteristics = vec![(device_information::MANUFACTURER_NAME, READ)];
        if let Some(pnp) = pnp {
            self.values.insert(device_information::PNP_ID, pnp.to_vec());
            characteristics.push((device_information::PNP_ID, READ));
        }
        self.with_service(DEVICE_INFORMATION_SERVICE_UUID, &characteristics)
    }

    pub fn failing_connects(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    pub fn hanging_connect(mut self) -> Self {
        self.hang_on_connect = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn failing_unsubscribe(mut self) -> Self {
        self.fail_unsubscribe = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    fn characteristic(&self, service: &Uuid, uuid: &Uuid) -> Option<CharacteristicProperties> {
        self.services
            .get(service)?
            .iter()
            .find(|(c, _)| c == uuid)
            .map(|(_, props)| *props)
    }
}

/// A write the transport accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub peripheral: String,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    peripherals: BTreeMap<String, FakePeripheral>,
    connected: HashSet<String>,
    subscriptions: HashSet<(String, Uuid)>,
    writes: Vec<RecordedWrite>,
    connect_calls: HashMap<String, u32>,
    scan_requests: Vec<ScanRequest>,
}

/// In-memory [`BleTransport`].
pub struct FakeTransport {
    state: Mutex<FakeState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(FakeState::default()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_peripheral(&self, peripheral: FakePeripheral) {
        self.state()
            .peripherals
            .insert(peripheral.id.clone(), peripheral);
    }

    /// Push a notification. Only delivered while subscribed, like a real
    /// device. Returns whether it was delivered.
    pub fn notify(&self, peripheral: &str, characteristic: Uuid, value: &[u8]) -> bool {
        let subscribed = self
            .state()
            .subscriptions
            .contains(&(peripheral.to_string(), characteristic));
        if subscribed {
            let _ = self.event_tx.send(TransportEvent::Notification {
                peripheral: peripheral.to_string(),
                characteristic,
                value: value.to_vec(),
            });
        }
        subscribed
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self, peripheral: &str) {
        {
            let mut state = self.state();
            state.connected.remove(peripheral);
            state.subscriptions.retain(|(p, _)| p != peripheral);
        }
        let _ = self.event_tx.send(TransportEvent::Disconnected {
            peripheral: peripheral.to_string(),
        });
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    pub fn connect_calls(&self, peripheral: &str) -> u32 {
        self.state()
            .connect_calls
            .get(peripheral)
            .copied()
            .unwrap_or_default()
    }

    pub fn link_open(&self, peripheral: &str) -> bool {
        self.state().connected.contains(peripheral)
    }

    pub fn is_subscribed(&self, peripheral: &str, characteristic: Uuid) -> bool {
        self.state()
            .subscriptions
            .contains(&(peripheral.to_string(), characteristic))
    }

    pub fn subscription_count(&self, peripheral: &str) -> usize {
        self.state()
            .subscriptions
            .iter()
            .filter(|(p, _)| p == peripheral)
            .count()
    }

    pub fn scan_requests(&self) -> Vec<ScanRequest> {
        self.state().scan_requests.clone()
    }

    fn require_connected(state: &FakeState, peripheral: &str) -> Result<(), TransportError> {
        if !state.peripherals.contains_key(peripheral) {
            return Err(TransportError::NotFound(peripheral.to_string()));
        }
        if !state.connected.contains(peripheral) {
            return Err(TransportError::NotConnected(peripheral.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn request_device(&self, request: &ScanRequest) -> Result<ScannedDevice, TransportError> {
        let mut state = self.state();
        state.scan_requests.push(request.clone());

        state
            .peripherals
            .values()
            .filter(|p| !p.hidden)
            .filter(|p| {
                let services: Vec<Uuid> = p.services.keys().copied().collect();
                request
                    .filters
                    .iter()
                    .any(|f| f.matches(p.name.as_deref(), &services))
            })
            .max_by_key(|p| p.rssi.unwrap_or(i16::MIN))
            .map(|p| ScannedDevice {
                id: p.id.clone(),
                name: p.name.clone(),
                rssi: p.rssi,
                services: p.services.keys().copied().collect(),
            })
            .ok_or_else(|| TransportError::Rejected("no device selected".to_string()))
    }

    async fn connect(&self, peripheral: &str) -> Result<(), TransportError> {
        let hang = {
            let mut state = self.state();
            *state.connect_calls.entry(peripheral.to_string()).or_default() += 1;

            let device = state
                .peripherals
                .get_mut(peripheral)
                .ok_or_else(|| TransportError::NotFound(peripheral.to_string()))?;
            if device.connect_failures > 0 {
                device.connect_failures -= 1;
                return Err(TransportError::Platform("connection refused".to_string()));
            }
            let hang = device.hang_on_connect;
            if !hang {
                state.connected.insert(peripheral.to_string());
            }
            hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &str) -> Result<(), TransportError> {
        let was_open = {
            let mut state = self.state();
            state.subscriptions.retain(|(p, _)| p != peripheral);
            state.connected.remove(peripheral)
        };
        // The adapter reports local disconnects like remote ones
        if was_open {
            let _ = self.event_tx.send(TransportEvent::Disconnected {
                peripheral: peripheral.to_string(),
            });
        }
        Ok(())
    }

    async fn is_connected(&self, peripheral: &str) -> bool {
        self.state().connected.contains(peripheral)
    }

    async fn primary_services(&self, peripheral: &str) -> Result<Vec<Uuid>, TransportError> {
        let state = self.state();
        Self::require_connected(&state, peripheral)?;
        Ok(state.peripherals[peripheral].services.keys().copied().collect())
    }

    async fn resolve_service(
        &self,
        peripheral: &str,
        service: Uuid,
    ) -> Result<ServiceHandle, TransportError> {
        let state = self.state();
        Self::require_connected(&state, peripheral)?;
        if state.peripherals[peripheral].services.contains_key(&service) {
            Ok(ServiceHandle { uuid: service })
        } else {
            Err(TransportError::NotFound(format!("service {}", service)))
        }
    }

    async fn resolve_characteristic(
        &self,
        peripheral: &str,
        service: &ServiceHandle,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        let state = self.state();
        Self::require_connected(&state, peripheral)?;
        state.peripherals[peripheral]
            .characteristic(&service.uuid, &characteristic)
            .map(|properties| CharacteristicHandle {
                service: service.uuid,
                uuid: characteristic,
                properties,
            })
            .ok_or_else(|| TransportError::NotFound(format!("characteristic {}", characteristic)))
    }

    async fn read(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError> {
        let state = self.state();
        Self::require_connected(&state, peripheral)?;
        state.peripherals[peripheral]
            .values
            .get(&characteristic.uuid)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("value of {}", characteristic.uuid)))
    }

    async fn write(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        Self::require_connected(&state, peripheral)?;
        if !characteristic.properties.can_write() {
            return Err(TransportError::Rejected(format!(
                "{} is not writable",
                characteristic.uuid
            )));
        }
        state.writes.push(RecordedWrite {
            peripheral: peripheral.to_string(),
            characteristic: characteristic.uuid,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        Self::require_connected(&state, peripheral)?;
        if state.peripherals[peripheral].fail_subscribe {
            return Err(TransportError::Platform("CCCD write failed".to_string()));
        }
        state
            .subscriptions
            .insert((peripheral.to_string(), characteristic.uuid));
        Ok(())
    }

    async fn unsubscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        Self::require_connected(&state, peripheral)?;
        if state.peripherals[peripheral].fail_unsubscribe {
            return Err(TransportError::Platform("CCCD write failed".to_string()));
        }
        state
            .subscriptions
            .remove(&(peripheral.to_string(), characteristic.uuid));
        Ok(())
    }

    fn events(&self) -> BoxStream<'static, TransportEvent> {
        let receiver = self
            .event_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match receiver {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}
