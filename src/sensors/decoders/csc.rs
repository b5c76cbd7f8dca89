//! CSC Measurement (0x2A5B) decoding. Only crank data is kept.

use super::{DecodeError, FieldReader};

/// Cumulative wheel revolutions (u32) + last wheel event time (u16)
const WHEEL_DATA_WIDTH: usize = 6;

/// Decoded CSC Measurement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CscMeasurement {
    pub flags: u8,
    /// Cumulative crank revolutions
    pub crank_revolutions: Option<u16>,
    /// Last crank event time in seconds
    pub crank_event_time_s: Option<f32>,
}

impl CscMeasurement {
    pub fn has_crank_data(&self) -> bool {
        self.crank_revolutions.is_some()
    }
}

/// Parse a CSC Measurement notification.
pub fn parse_csc_measurement(data: &[u8]) -> Result<CscMeasurement, DecodeError> {
    let mut reader = FieldReader::new(data);
    reader.require(1)?;
    let flags = reader.u8().unwrap_or_default();

    let mut result = CscMeasurement {
        flags,
        ..Default::default()
    };

    if flags & 0x01 != 0 && reader.skip(WHEEL_DATA_WIDTH).is_none() {
        return Ok(result);
    }

    if flags & 0x02 != 0 && reader.remaining() >= 4 {
        result.crank_revolutions = reader.u16();
        result.crank_event_time_s = reader.u16().map(|raw| f32::from(raw) / 1024.0);
    }

    Ok(result)
}
