//! Payload decoders for every supported wire format.
//!
//! Each decoder is a pure function over a notification payload. Mandatory
//! fields that are missing yield [`DecodeError::Truncated`]; optional fields
//! that run past the end of the buffer are simply left absent.

pub mod csc;
pub mod cycling_power;
pub mod device_info;
pub mod ftms;
pub mod heart_rate;
pub mod shifting;

use crate::sensors::profiles::CharacteristicKind;
use crate::sensors::types::DeviceRole;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use csc::{parse_csc_measurement, CscMeasurement};
pub use cycling_power::{parse_cycling_power_measurement, CyclingPowerMeasurement};
pub use device_info::{DeviceInformation, PnpId};
pub use ftms::{parse_indoor_bike_data, IndoorBikeData};
pub use heart_rate::{parse_heart_rate_measurement, HeartRateMeasurement, SensorContact};
pub use shifting::{parse_shifter_data, ShifterData};

/// Decoding failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload ends before a mandatory field
    #[error("Payload truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// Little-endian field reader over a payload.
///
/// Every accessor returns `None` instead of reading past the buffer, so the
/// offset only ever advances over bytes that exist.
#[derive(Debug)]
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.offset..self.offset + N)?;
        self.offset += N;
        bytes.try_into().ok()
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub(crate) fn i16(&mut self) -> Option<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    /// Advance over a field without decoding it.
    pub(crate) fn skip(&mut self, width: usize) -> Option<()> {
        if self.remaining() < width {
            return None;
        }
        self.offset += width;
        Some(())
    }

    /// Require `width` more bytes for a mandatory field.
    pub(crate) fn require(&self, width: usize) -> Result<(), DecodeError> {
        if self.remaining() < width {
            return Err(DecodeError::Truncated {
                needed: self.offset + width,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// How much downstream consumers should trust a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Decoded from a published specification
    #[default]
    Standard,
    /// Best-effort decode of an undocumented vendor format
    Advisory,
}

fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

/// Trainer-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerDetail {
    pub power_watts: Option<i16>,
    pub cadence_rpm: Option<f32>,
    pub resistance_level: Option<i16>,
    pub heart_rate_bpm: Option<u8>,
    pub crank_revolutions: Option<u16>,
    pub crank_event_time_s: Option<f32>,
}

/// Power-meter-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerMeterDetail {
    pub power_watts: Option<i16>,
    pub cadence_rpm: Option<f32>,
    pub pedal_balance: Option<u8>,
    pub torque_nm: Option<f32>,
    pub crank_revolutions: Option<u16>,
    pub crank_event_time_s: Option<f32>,
}

/// Heart-rate-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartRateDetail {
    pub heart_rate_bpm: Option<u16>,
    pub sensor_contact: Option<SensorContact>,
    pub energy_expended_kj: Option<u16>,
    pub rr_intervals_ms: Option<Vec<f32>>,
}

/// Shifting fields. Always advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftingDetail {
    pub front_gear: Option<u8>,
    pub rear_gear: Option<u8>,
    pub battery_level: Option<u8>,
    pub confidence: Confidence,
}

impl Default for ShiftingDetail {
    fn default() -> Self {
        Self {
            front_gear: None,
            rear_gear: None,
            battery_level: None,
            confidence: Confidence::Advisory,
        }
    }
}

/// Role-specific part of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleDetail {
    Trainer(TrainerDetail),
    PowerMeter(PowerMeterDetail),
    HeartRate(HeartRateDetail),
    ElectronicShifting(ShiftingDetail),
}

impl RoleDetail {
    pub fn role(&self) -> DeviceRole {
        match self {
            RoleDetail::Trainer(_) => DeviceRole::Trainer,
            RoleDetail::PowerMeter(_) => DeviceRole::PowerMeter,
            RoleDetail::HeartRate(_) => DeviceRole::HeartRate,
            RoleDetail::ElectronicShifting(_) => DeviceRole::ElectronicShifting,
        }
    }

    /// Field-level overwrite with the fields `other` reports. Details of
    /// different roles are left untouched.
    pub fn merge_from(&mut self, other: &RoleDetail) {
        match (self, other) {
            (RoleDetail::Trainer(a), RoleDetail::Trainer(b)) => {
                overwrite(&mut a.power_watts, &b.power_watts);
                overwrite(&mut a.cadence_rpm, &b.cadence_rpm);
                overwrite(&mut a.resistance_level, &b.resistance_level);
                overwrite(&mut a.heart_rate_bpm, &b.heart_rate_bpm);
                overwrite(&mut a.crank_revolutions, &b.crank_revolutions);
                overwrite(&mut a.crank_event_time_s, &b.crank_event_time_s);
            }
            (RoleDetail::PowerMeter(a), RoleDetail::PowerMeter(b)) => {
                overwrite(&mut a.power_watts, &b.power_watts);
                overwrite(&mut a.cadence_rpm, &b.cadence_rpm);
                overwrite(&mut a.pedal_balance, &b.pedal_balance);
                overwrite(&mut a.torque_nm, &b.torque_nm);
                overwrite(&mut a.crank_revolutions, &b.crank_revolutions);
                overwrite(&mut a.crank_event_time_s, &b.crank_event_time_s);
            }
            (RoleDetail::HeartRate(a), RoleDetail::HeartRate(b)) => {
                overwrite(&mut a.heart_rate_bpm, &b.heart_rate_bpm);
                overwrite(&mut a.sensor_contact, &b.sensor_contact);
                overwrite(&mut a.energy_expended_kj, &b.energy_expended_kj);
                overwrite(&mut a.rr_intervals_ms, &b.rr_intervals_ms);
            }
            (RoleDetail::ElectronicShifting(a), RoleDetail::ElectronicShifting(b)) => {
                overwrite(&mut a.front_gear, &b.front_gear);
                overwrite(&mut a.rear_gear, &b.rear_gear);
                overwrite(&mut a.battery_level, &b.battery_level);
            }
            _ => {}
        }
    }
}

/// Fields decoded from a single notification. Absent means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialSample {
    pub power: Option<i16>,
    pub cadence: Option<f32>,
    pub heart_rate: Option<u16>,
    pub resistance: Option<i16>,
    pub battery_level: Option<u8>,
    pub detail: Option<RoleDetail>,
}

impl PartialSample {
    /// Whether nothing was decoded.
    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.cadence.is_none()
            && self.heart_rate.is_none()
            && self.resistance.is_none()
            && self.battery_level.is_none()
            && self.detail.is_none()
    }
}

/// Decode a notification from `characteristic` on a device playing `role`.
///
/// Characteristics that carry no sample data (features, status, control
/// points) decode to an empty [`PartialSample`].
pub fn decode(
    role: DeviceRole,
    characteristic: CharacteristicKind,
    data: &[u8],
) -> Result<PartialSample, DecodeError> {
    use CharacteristicKind::*;

    let sample = match (role, characteristic) {
        (DeviceRole::Trainer, IndoorBikeData) => {
            let bike = parse_indoor_bike_data(data)?;
            PartialSample {
                power: bike.power_watts,
                cadence: bike.cadence_rpm,
                heart_rate: bike.heart_rate_bpm.map(u16::from),
                resistance: bike.resistance_level,
                detail: Some(RoleDetail::Trainer(TrainerDetail {
                    power_watts: bike.power_watts,
                    cadence_rpm: bike.cadence_rpm,
                    resistance_level: bike.resistance_level,
                    heart_rate_bpm: bike.heart_rate_bpm,
                    ..Default::default()
                })),
                ..Default::default()
            }
        }
        (DeviceRole::Trainer, CyclingPowerMeasurement) => {
            let cps = parse_cycling_power_measurement(data)?;
            let cadence = cps.cadence_rpm.map(f32::from);
            PartialSample {
                power: Some(cps.power_watts),
                cadence,
                detail: Some(RoleDetail::Trainer(TrainerDetail {
                    power_watts: Some(cps.power_watts),
                    cadence_rpm: cadence,
                    crank_revolutions: cps.crank_revolutions,
                    crank_event_time_s: cps.crank_event_time_s,
                    ..Default::default()
                })),
                ..Default::default()
            }
        }
        (DeviceRole::PowerMeter, CyclingPowerMeasurement) => {
            let cps = parse_cycling_power_measurement(data)?;
            let cadence = cps.cadence_rpm.map(f32::from);
            PartialSample {
                power: Some(cps.power_watts),
                cadence,
                detail: Some(RoleDetail::PowerMeter(PowerMeterDetail {
                    power_watts: Some(cps.power_watts),
                    cadence_rpm: cadence,
                    pedal_balance: cps.pedal_balance,
                    torque_nm: cps.torque_nm,
                    crank_revolutions: cps.crank_revolutions,
                    crank_event_time_s: cps.crank_event_time_s,
                })),
                ..Default::default()
            }
        }
        (DeviceRole::Trainer, CscMeasurement) => {
            let csc = parse_csc_measurement(data)?;
            PartialSample {
                detail: csc.has_crank_data().then(|| {
                    RoleDetail::Trainer(TrainerDetail {
                        crank_revolutions: csc.crank_revolutions,
                        crank_event_time_s: csc.crank_event_time_s,
                        ..Default::default()
                    })
                }),
                ..Default::default()
            }
        }
        (DeviceRole::PowerMeter, CscMeasurement) => {
            let csc = parse_csc_measurement(data)?;
            PartialSample {
                detail: csc.has_crank_data().then(|| {
                    RoleDetail::PowerMeter(PowerMeterDetail {
                        crank_revolutions: csc.crank_revolutions,
                        crank_event_time_s: csc.crank_event_time_s,
                        ..Default::default()
                    })
                }),
                ..Default::default()
            }
        }
        (DeviceRole::HeartRate, HeartRateMeasurement) => {
            let hr = parse_heart_rate_measurement(data)?;
            PartialSample {
                heart_rate: Some(hr.heart_rate_bpm),
                detail: Some(RoleDetail::HeartRate(HeartRateDetail {
                    heart_rate_bpm: Some(hr.heart_rate_bpm),
                    sensor_contact: Some(hr.sensor_contact),
                    energy_expended_kj: hr.energy_expended_kj,
                    rr_intervals_ms: hr.rr_intervals_ms,
                })),
                ..Default::default()
            }
        }
        (DeviceRole::ElectronicShifting, GearPosition) => {
            let shifter = parse_shifter_data(data)?;
            PartialSample {
                battery_level: shifter.battery_level,
                detail: Some(RoleDetail::ElectronicShifting(ShiftingDetail {
                    front_gear: shifter.front_gear,
                    rear_gear: shifter.rear_gear,
                    battery_level: shifter.battery_level,
                    confidence: Confidence::Advisory,
                })),
                ..Default::default()
            }
        }
        (_, BatteryLevel) => {
            let mut reader = FieldReader::new(data);
            reader.require(1)?;
            PartialSample {
                battery_level: reader.u8(),
                ..Default::default()
            }
        }
        (role, other) => {
            tracing::trace!("No sample fields in {} for {}", other, role);
            PartialSample::default()
        }
    };

    Ok(sample)
}
