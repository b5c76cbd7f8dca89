//! Scanning and the discovered-device list.
//!
//! A single-role scan trusts its filters. Multi-role scans inspect the chosen
//! device's services over a transient connection and fall back to the
//! classifier when no inspection matches.

use crate::sensors::classifier::{ClassifierInput, DeviceClassifier};
use crate::sensors::profiles::{
    self, BATTERY_SERVICE_UUID, DEVICE_INFORMATION_SERVICE_UUID,
};
use crate::sensors::transport::{BleTransport, ScanRequest, ScannedDevice, TransportError};
use crate::sensors::types::{DeviceRole, DiscoveredDevice, SensorError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Owns the discovered-device list.
pub struct DiscoveryOrchestrator {
    discovered: Vec<DiscoveredDevice>,
    classifier: DeviceClassifier,
    /// Cap on the transient inspection connection
    inspect_timeout: Duration,
}

impl DiscoveryOrchestrator {
    pub fn new(inspect_timeout: Duration) -> Self {
        Self::with_classifier(DeviceClassifier::new(), inspect_timeout)
    }

    pub fn with_classifier(classifier: DeviceClassifier, inspect_timeout: Duration) -> Self {
        Self {
            discovered: Vec::new(),
            classifier,
            inspect_timeout,
        }
    }

    /// Every discovered entry, oldest first.
    pub fn discovered(&self) -> &[DiscoveredDevice] {
        &self.discovered
    }

    pub fn find(&self, id: &str) -> Option<&DiscoveredDevice> {
        self.discovered.iter().find(|d| d.id == id)
    }

    pub fn clear(&mut self) {
        self.discovered.clear();
    }

    /// Mark an entry as successfully connected.
    pub fn mark_paired(&mut self, id: &str) {
        if let Some(device) = self.discovered.iter_mut().find(|d| d.id == id) {
            device.paired = true;
        }
    }

    /// Add an entry, replacing any entry with the same id in place.
    pub fn record(&mut self, device: DiscoveredDevice) -> DiscoveredDevice {
        match self.discovered.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => {
                tracing::debug!("Rediscovered {}", device.id);
                *existing = device.clone();
            }
            None => {
                tracing::info!("Discovered {} ({}) as {}", device.name, device.id, device.role);
                self.discovered.push(device.clone());
            }
        }
        device
    }

    /// Scan for a device of one role.
    pub async fn scan(
        &mut self,
        transport: &dyn BleTransport,
        role: DeviceRole,
    ) -> Result<DiscoveredDevice, SensorError> {
        let profile = profiles::profile_for(role);
        let request = ScanRequest {
            filters: profile.filters.to_vec(),
            optional_services: optional_services(&[role]),
        };

        let scanned = request_device(transport, &request).await?;
        let id = scanned.id.clone();
        Ok(self.record(entry(id, &scanned, role)))
    }

    /// Scan for a device matching any of `roles` and keep the first role it
    /// supports, in priority order.
    pub async fn scan_multiple(
        &mut self,
        transport: &dyn BleTransport,
        roles: &[DeviceRole],
    ) -> Result<DiscoveredDevice, SensorError> {
        let (scanned, matched) = self.scan_and_inspect(transport, roles).await?;
        let role = matched.first().copied().ok_or_else(|| unmatched(&scanned))?;
        let id = scanned.id.clone();
        Ok(self.record(entry(id, &scanned, role)))
    }

    /// Scan for a device and record one entry per role it supports. Entries
    /// share the physical handle and get `<peripheral>_<role>` ids.
    pub async fn smart_discover(
        &mut self,
        transport: &dyn BleTransport,
        roles: &[DeviceRole],
    ) -> Result<Vec<DiscoveredDevice>, SensorError> {
        let (scanned, matched) = self.scan_and_inspect(transport, roles).await?;
        if matched.is_empty() {
            return Err(unmatched(&scanned));
        }

        Ok(matched
            .into_iter()
            .map(|role| {
                let id = format!("{}_{}", scanned.id, role.as_str());
                self.record(entry(id, &scanned, role))
            })
            .collect())
    }

    async fn scan_and_inspect(
        &self,
        transport: &dyn BleTransport,
        roles: &[DeviceRole],
    ) -> Result<(ScannedDevice, Vec<DeviceRole>), SensorError> {
        if roles.is_empty() {
            return Err(SensorError::ScanRejected("no roles requested".to_string()));
        }

        let request = ScanRequest {
            filters: profiles::filters_for(roles),
            optional_services: optional_services(roles),
        };
        let scanned = request_device(transport, &request).await?;

        let mut matched = self.inspect(transport, &scanned.id, roles).await;
        if matched.is_empty() {
            let input = ClassifierInput {
                peripheral_id: scanned.id.clone(),
                name: scanned.name.clone(),
            };
            if let Some(role) = self.classifier.identify(transport, &input).await {
                if roles.contains(&role) {
                    matched.push(role);
                } else {
                    tracing::debug!("{} identified as {}, which was not requested", scanned.id, role);
                }
            }
        }

        Ok((scanned, matched))
    }

    /// Roles whose primary service the device exposes, in priority order.
    async fn inspect(
        &self,
        transport: &dyn BleTransport,
        peripheral: &str,
        roles: &[DeviceRole],
    ) -> Vec<DeviceRole> {
        let opened = !transport.is_connected(peripheral).await;
        if opened {
            match tokio::time::timeout(self.inspect_timeout, transport.connect(peripheral)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Inspection connection to {} failed: {}", peripheral, e);
                    return Vec::new();
                }
                Err(_) => {
                    tracing::warn!("Inspection connection to {} timed out", peripheral);
                    return Vec::new();
                }
            }
        }

        let mut matched = Vec::new();
        for role in DeviceRole::ALL.into_iter().filter(|r| roles.contains(r)) {
            let service = profiles::profile_for(role).service;
            if transport.resolve_service(peripheral, service).await.is_ok() {
                matched.push(role);
            }
        }

        if opened {
            if let Err(e) = transport.disconnect(peripheral).await {
                tracing::debug!("Closing inspection connection to {} failed: {}", peripheral, e);
            }
        }

        matched
    }
}

async fn request_device(
    transport: &dyn BleTransport,
    request: &ScanRequest,
) -> Result<ScannedDevice, SensorError> {
    transport.request_device(request).await.map_err(|e| match e {
        TransportError::Rejected(reason) | TransportError::NotFound(reason) => {
            SensorError::ScanRejected(reason)
        }
        other => SensorError::Transport(other),
    })
}

fn optional_services(roles: &[DeviceRole]) -> Vec<Uuid> {
    let mut services: Vec<Uuid> = roles
        .iter()
        .map(|role| profiles::profile_for(*role).service)
        .collect();
    services.push(BATTERY_SERVICE_UUID);
    services.push(DEVICE_INFORMATION_SERVICE_UUID);
    services.dedup();
    services
}

fn unmatched(scanned: &ScannedDevice) -> SensorError {
    SensorError::ScanRejected(format!(
        "{} supports none of the requested roles",
        scanned.name.as_deref().unwrap_or(&scanned.id)
    ))
}

fn entry(id: String, scanned: &ScannedDevice, role: DeviceRole) -> DiscoveredDevice {
    DiscoveredDevice {
        id,
        peripheral_id: scanned.id.clone(),
        name: scanned
            .name
            .clone()
            .unwrap_or_else(|| format!("Unknown {}", role)),
        role,
        signal_strength: scanned.rssi,
        paired: false,
        last_seen: Instant::now(),
    }
}
