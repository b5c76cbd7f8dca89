//! `btleplug` backend for [`BleTransport`].

use crate::sensors::transport::{
    BleTransport, CharacteristicHandle, CharacteristicProperties, ScanRequest, ScannedDevice,
    ServiceHandle, TransportError, TransportEvent,
};
use crate::sensors::types::SensorError;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as PlatformScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Real Bluetooth transport on the first available adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    /// How long a scan listens before choosing a device
    scan_window: Duration,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl BtleplugTransport {
    /// Initialize the BLE adapter.
    pub async fn new(scan_window: Duration) -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE adapter");

        let manager = Manager::new().await.map_err(|e| {
            tracing::error!("BLE manager unavailable: {}", e);
            SensorError::UnsupportedPlatform
        })?;

        let adapter = manager
            .adapters()
            .await
            .map_err(platform_error)?
            .into_iter()
            .next()
            .ok_or(SensorError::UnsupportedPlatform)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut central_events = adapter.events().await.map_err(platform_error)?;
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    tracing::debug!("Adapter reports {} disconnected", id);
                    let sent = tx.send(TransportEvent::Disconnected {
                        peripheral: id.to_string(),
                    });
                    if sent.is_err() {
                        break;
                    }
                }
            }
        });

        tracing::info!("BLE adapter initialized");

        Ok(Self {
            adapter,
            scan_window,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    async fn peripheral(&self, id: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await
            .map_err(platform_error)?
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| TransportError::NotFound(id.to_string()))
    }

    async fn characteristic(
        &self,
        peripheral: &str,
        handle: &CharacteristicHandle,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral(peripheral).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)
            .ok_or_else(|| TransportError::NotFound(format!("characteristic {}", handle.uuid)))?;
        Ok((peripheral, characteristic))
    }
}

fn platform_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::DeviceNotFound => TransportError::NotFound(e.to_string()),
        btleplug::Error::NotConnected => TransportError::NotConnected(e.to_string()),
        btleplug::Error::PermissionDenied => TransportError::Rejected(e.to_string()),
        other => TransportError::Platform(other.to_string()),
    }
}

fn properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn request_device(&self, request: &ScanRequest) -> Result<ScannedDevice, TransportError> {
        tracing::info!("Scanning for {:?}", self.scan_window);

        self.adapter
            .start_scan(PlatformScanFilter::default())
            .await
            .map_err(platform_error)?;
        tokio::time::sleep(self.scan_window).await;
        if let Err(e) = self.adapter.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }

        let mut best: Option<ScannedDevice> = None;
        for peripheral in self.adapter.peripherals().await.map_err(platform_error)? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let matches = request
                .filters
                .iter()
                .any(|f| f.matches(props.local_name.as_deref(), &props.services));
            if !matches {
                continue;
            }

            let candidate = ScannedDevice {
                id: peripheral.id().to_string(),
                name: props.local_name,
                rssi: props.rssi,
                services: props.services,
            };
            tracing::debug!("Scan candidate {} ({:?})", candidate.id, candidate.name);

            let stronger = best
                .as_ref()
                .map_or(true, |b| candidate.rssi.unwrap_or(i16::MIN) > b.rssi.unwrap_or(i16::MIN));
            if stronger {
                best = Some(candidate);
            }
        }

        best.ok_or_else(|| TransportError::Rejected("no matching device found".to_string()))
    }

    async fn connect(&self, peripheral: &str) -> Result<(), TransportError> {
        let device = self.peripheral(peripheral).await?;
        if device.is_connected().await.unwrap_or(false) {
            return Ok(());
        }

        device.connect().await.map_err(platform_error)?;
        device.discover_services().await.map_err(platform_error)?;

        let mut notifications = device.notifications().await.map_err(platform_error)?;
        let tx = self.event_tx.clone();
        let id = peripheral.to_string();
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let event = TransportEvent::Notification {
                    peripheral: id.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            tracing::debug!("Notification stream for {} ended", id);
        });

        Ok(())
    }

    async fn disconnect(&self, peripheral: &str) -> Result<(), TransportError> {
        let device = self.peripheral(peripheral).await?;
        device.disconnect().await.map_err(platform_error)
    }

    async fn is_connected(&self, peripheral: &str) -> bool {
        match self.peripheral(peripheral).await {
            Ok(device) => device.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn primary_services(&self, peripheral: &str) -> Result<Vec<Uuid>, TransportError> {
        let device = self.peripheral(peripheral).await?;
        Ok(device
            .services()
            .into_iter()
            .filter(|s| s.primary)
            .map(|s| s.uuid)
            .collect())
    }

    async fn resolve_service(
        &self,
        peripheral: &str,
        service: Uuid,
    ) -> Result<ServiceHandle, TransportError> {
        let device = self.peripheral(peripheral).await?;
        if !device.is_connected().await.map_err(platform_error)? {
            return Err(TransportError::NotConnected(peripheral.to_string()));
        }
        device
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| ServiceHandle { uuid: s.uuid })
            .ok_or_else(|| TransportError::NotFound(format!("service {}", service)))
    }

    async fn resolve_characteristic(
        &self,
        peripheral: &str,
        service: &ServiceHandle,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        let device = self.peripheral(peripheral).await?;
        device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service.uuid)
            .map(|c| CharacteristicHandle {
                service: c.service_uuid,
                uuid: c.uuid,
                properties: properties(c.properties),
            })
            .ok_or_else(|| TransportError::NotFound(format!("characteristic {}", characteristic)))
    }

    async fn read(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError> {
        let (device, c) = self.characteristic(peripheral, characteristic).await?;
        device.read(&c).await.map_err(platform_error)
    }

    async fn write(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let (device, c) = self.characteristic(peripheral, characteristic).await?;
        let write_type = if characteristic.properties.write {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        device.write(&c, data, write_type).await.map_err(platform_error)
    }

    async fn subscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let (device, c) = self.characteristic(peripheral, characteristic).await?;
        device.subscribe(&c).await.map_err(platform_error)
    }

    async fn unsubscribe(
        &self,
        peripheral: &str,
        characteristic: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let (device, c) = self.characteristic(peripheral, characteristic).await?;
        device.unsubscribe(&c).await.map_err(platform_error)
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
