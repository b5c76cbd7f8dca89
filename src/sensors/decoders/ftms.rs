//! FTMS (Fitness Machine Service) Indoor Bike Data and control point commands.

use super::{DecodeError, FieldReader};

/// Indoor Bike Data field widths in flag-bit order (bit, width in bytes).
///
/// Offsets are cumulative: every set bit advances the cursor by its width
/// whether or not the field is decoded.
const INDOOR_BIKE_FIELDS: [(u8, usize); 13] = [
    (0, 2),  // instantaneous speed
    (1, 2),  // average speed
    (2, 2),  // instantaneous cadence
    (3, 2),  // average cadence
    (4, 3),  // total distance
    (5, 2),  // resistance level
    (6, 2),  // instantaneous power
    (7, 2),  // average power
    (8, 5),  // expended energy (total, per hour, per minute)
    (9, 1),  // heart rate
    (10, 1), // metabolic equivalent
    (11, 2), // elapsed time
    (12, 2), // remaining time
];

/// Decoded Indoor Bike Data (0x2AD2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndoorBikeData {
    /// Raw flag word
    pub flags: u16,
    /// Instantaneous cadence in RPM (0.5 resolution)
    pub cadence_rpm: Option<f32>,
    /// Resistance level (unitless, signed)
    pub resistance_level: Option<i16>,
    /// Instantaneous power in watts
    pub power_watts: Option<i16>,
    /// Heart rate in BPM
    pub heart_rate_bpm: Option<u8>,
    /// Bytes walked, flags included
    pub consumed: usize,
}

/// Bytes a well-formed payload with these flags occupies.
pub fn declared_length(flags: u16) -> usize {
    2 + INDOOR_BIKE_FIELDS
        .iter()
        .filter(|(bit, _)| flags & (1u16 << bit) != 0)
        .map(|(_, width)| width)
        .sum::<usize>()
}

/// Parse an Indoor Bike Data notification.
///
/// Only the 16-bit flag word is mandatory. Walking stops at the first field
/// that does not fit; everything from there on is absent.
pub fn parse_indoor_bike_data(data: &[u8]) -> Result<IndoorBikeData, DecodeError> {
    let mut reader = FieldReader::new(data);
    reader.require(2)?;
    let flags = reader.u16().unwrap_or_default();

    let mut result = IndoorBikeData {
        flags,
        ..Default::default()
    };

    for (bit, width) in INDOOR_BIKE_FIELDS {
        if flags & (1u16 << bit) == 0 {
            continue;
        }
        if reader.remaining() < width {
            tracing::trace!(
                "Indoor bike data truncated at flag bit {} (offset {})",
                bit,
                reader.offset()
            );
            break;
        }

        match bit {
            // 0.5 RPM resolution
            2 => result.cadence_rpm = reader.u16().map(|raw| f32::from(raw) / 2.0),
            5 => result.resistance_level = reader.i16(),
            6 => result.power_watts = reader.i16(),
            9 => result.heart_rate_bpm = reader.u8(),
            _ => {
                reader.skip(width);
            }
        }
    }

    result.consumed = reader.offset();
    Ok(result)
}

/// FTMS Control Point opcodes.
#[repr(u8)]
pub enum FtmsControlOpcode {
    /// Reset the fitness machine
    Reset = 0x01,
    /// Set target power
    SetTargetPower = 0x05,
}

/// Build a control point command to reset the trainer.
pub fn build_reset() -> Vec<u8> {
    vec![FtmsControlOpcode::Reset as u8]
}

/// Build a control point command to set target power (ERG mode).
///
/// `target_watts` - Target power in watts
pub fn build_set_target_power(target_watts: u16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&target_watts.to_le_bytes());
    cmd
}
