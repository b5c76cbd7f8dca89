//! Merges decoded partial samples into one canonical sample.
//!
//! Every field is last-writer-wins, whichever device or characteristic wrote
//! it. Fields nobody has reported stay absent rather than zero.

use crate::sensors::decoders::{PartialSample, RoleDetail};
use crate::sensors::types::DeviceRole;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Merged view of every connected sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalSample {
    /// Time of the merge that produced this sample
    pub timestamp: DateTime<Utc>,
    /// Power in watts
    pub power: Option<i16>,
    /// Cadence in RPM
    pub cadence: Option<f32>,
    /// Heart rate in BPM
    pub heart_rate: Option<u16>,
    /// Trainer resistance level
    pub resistance: Option<i16>,
    /// Last reported battery percentage
    pub battery_level: Option<u8>,
    /// Role-specific fields
    pub per_role: BTreeMap<DeviceRole, RoleDetail>,
}

impl CanonicalSample {
    /// A sample with every field absent.
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            power: None,
            cadence: None,
            heart_rate: None,
            resistance: None,
            battery_level: None,
            per_role: BTreeMap::new(),
        }
    }

    /// Role detail for `role`, if that role has reported anything.
    pub fn detail(&self, role: DeviceRole) -> Option<&RoleDetail> {
        self.per_role.get(&role)
    }
}

impl Default for CanonicalSample {
    fn default() -> Self {
        Self::empty()
    }
}

/// Canonical fields that can be written by more than one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SampleField {
    Power,
    Cadence,
    HeartRate,
    Resistance,
    Battery,
}

/// Merges partial samples and remembers who wrote what.
#[derive(Debug, Default)]
pub struct SampleAggregator {
    current: CanonicalSample,
    /// Device that last wrote each canonical field
    sources: HashMap<SampleField, String>,
    /// Number of merges since the last reset
    merges: u64,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial sample from `device_id` and return the new canonical
    /// sample.
    pub fn merge(&mut self, device_id: &str, partial: PartialSample) -> CanonicalSample {
        let PartialSample {
            power,
            cadence,
            heart_rate,
            resistance,
            battery_level,
            detail,
        } = partial;

        self.overwrite(SampleField::Power, device_id, power, |s| &mut s.power);
        self.overwrite(SampleField::Cadence, device_id, cadence, |s| &mut s.cadence);
        self.overwrite(SampleField::HeartRate, device_id, heart_rate, |s| {
            &mut s.heart_rate
        });
        self.overwrite(SampleField::Resistance, device_id, resistance, |s| {
            &mut s.resistance
        });
        self.overwrite(SampleField::Battery, device_id, battery_level, |s| {
            &mut s.battery_level
        });

        if let Some(detail) = detail {
            match self.current.per_role.get_mut(&detail.role()) {
                Some(existing) => existing.merge_from(&detail),
                None => {
                    self.current.per_role.insert(detail.role(), detail);
                }
            }
        }

        self.current.timestamp = Utc::now();
        self.merges += 1;
        self.current.clone()
    }

    fn overwrite<T>(
        &mut self,
        field: SampleField,
        device_id: &str,
        value: Option<T>,
        slot: impl FnOnce(&mut CanonicalSample) -> &mut Option<T>,
    ) {
        let Some(value) = value else {
            return;
        };

        match self.sources.get(&field) {
            Some(previous) if previous != device_id => {
                tracing::debug!(
                    "{:?} from {} overwrites value from {}",
                    field,
                    device_id,
                    previous
                );
            }
            _ => {}
        }

        *slot(&mut self.current) = Some(value);
        self.sources.insert(field, device_id.to_string());
    }

    /// Most recent canonical sample.
    pub fn latest(&self) -> &CanonicalSample {
        &self.current
    }

    /// Number of merges since the last reset.
    pub fn merge_count(&self) -> u64 {
        self.merges
    }

    /// Forget everything; the next sample starts with every field absent.
    pub fn reset(&mut self) {
        self.current = CanonicalSample::empty();
        self.sources.clear();
        self.merges = 0;
    }
}
