//! Heart Rate Measurement (0x2A37) decoding.

use super::{DecodeError, FieldReader};
use serde::{Deserialize, Serialize};

/// Skin contact status reported by the strap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    /// Contact detection not supported
    Unsupported,
    /// Supported, no contact detected
    NoContact,
    /// Supported, contact detected
    Contact,
}

impl SensorContact {
    fn from_flags(flags: u8) -> Self {
        match (flags >> 1) & 0x03 {
            3 => SensorContact::Contact,
            2 => SensorContact::NoContact,
            _ => SensorContact::Unsupported,
        }
    }
}

/// Decoded Heart Rate Measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// Skin contact status
    pub sensor_contact: SensorContact,
    /// Energy expended in kJ
    pub energy_expended_kj: Option<u16>,
    /// RR intervals in milliseconds
    pub rr_intervals_ms: Option<Vec<f32>>,
}

/// Parse a Heart Rate Measurement notification.
///
/// Flags:
/// - bit 0: heart rate is u16 (otherwise u8)
/// - bits 1-2: sensor contact status
/// - bit 3: energy expended present
/// - bit 4: RR intervals present (1/1024 s each, until end of payload)
pub fn parse_heart_rate_measurement(data: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    let mut reader = FieldReader::new(data);
    reader.require(1)?;
    let flags = reader.u8().unwrap_or_default();

    let heart_rate_bpm = if flags & 0x01 != 0 {
        reader.require(2)?;
        reader.u16().unwrap_or_default()
    } else {
        reader.require(1)?;
        reader.u8().map(u16::from).unwrap_or_default()
    };

    let energy_expended_kj = if flags & 0x08 != 0 {
        reader.u16()
    } else {
        None
    };

    let rr_intervals_ms = (flags & 0x10 != 0).then(|| {
        let mut intervals = Vec::with_capacity(reader.remaining() / 2);
        while let Some(raw) = reader.u16() {
            intervals.push(f32::from(raw) / 1024.0 * 1000.0);
        }
        intervals
    });

    Ok(HeartRateMeasurement {
        heart_rate_bpm,
        sensor_contact: SensorContact::from_flags(flags),
        energy_expended_kj,
        rr_intervals_ms,
    })
}
