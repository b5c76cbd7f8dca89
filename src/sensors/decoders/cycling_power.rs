//! Cycling Power Measurement (0x2A63) and Cycling Power Control Point commands.

use super::{DecodeError, FieldReader};

/// Optional field widths in flag-bit order (bit, width in bytes).
const POWER_FIELDS: [(u8, usize); 13] = [
    (0, 1),  // pedal power balance
    (1, 0),  // balance reference (flag only)
    (2, 2),  // cadence
    (3, 0),  // torque source (flag only)
    (4, 2),  // torque, 1/32 Nm
    (5, 4),  // crank revolutions + last crank event time
    (6, 4),  // extreme force magnitudes
    (7, 4),  // extreme torque magnitudes
    (8, 3),  // extreme angles
    (9, 2),  // top dead spot angle
    (10, 2), // bottom dead spot angle
    (11, 2), // accumulated energy
    (12, 0), // offset compensation indicator (flag only)
];

/// Decoded Cycling Power Measurement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CyclingPowerMeasurement {
    /// Raw flag word
    pub flags: u16,
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Pedal power balance (0.5% resolution)
    pub pedal_balance: Option<u8>,
    /// Cadence in RPM
    pub cadence_rpm: Option<u16>,
    /// Torque in Nm
    pub torque_nm: Option<f32>,
    /// Cumulative crank revolutions
    pub crank_revolutions: Option<u16>,
    /// Last crank event time in seconds
    pub crank_event_time_s: Option<f32>,
}

/// Parse a Cycling Power Measurement notification.
///
/// The flag word and instantaneous power are mandatory.
pub fn parse_cycling_power_measurement(
    data: &[u8],
) -> Result<CyclingPowerMeasurement, DecodeError> {
    let mut reader = FieldReader::new(data);
    reader.require(4)?;
    let flags = reader.u16().unwrap_or_default();
    let power_watts = reader.i16().unwrap_or_default();

    let mut result = CyclingPowerMeasurement {
        flags,
        power_watts,
        ..Default::default()
    };

    for (bit, width) in POWER_FIELDS {
        if flags & (1u16 << bit) == 0 {
            continue;
        }
        if reader.remaining() < width {
            break;
        }

        match bit {
            0 => result.pedal_balance = reader.u8(),
            2 => result.cadence_rpm = reader.u16(),
            4 => result.torque_nm = reader.u16().map(|raw| f32::from(raw) / 32.0),
            5 => {
                result.crank_revolutions = reader.u16();
                result.crank_event_time_s = reader.u16().map(|raw| f32::from(raw) / 1024.0);
            }
            _ => {
                reader.skip(width);
            }
        }
    }

    Ok(result)
}

/// Cycling Power Control Point opcodes.
#[repr(u8)]
pub enum PowerControlOpcode {
    /// Set cumulative value (crank/wheel counters)
    SetCumulativeValue = 0x01,
    /// Start enhanced offset compensation (zero offset calibration)
    StartOffsetCompensation = 0x0C,
}

/// Build a command that resets the cumulative counters to zero.
pub fn build_reset_cumulative_value() -> Vec<u8> {
    let mut cmd = vec![PowerControlOpcode::SetCumulativeValue as u8];
    cmd.extend_from_slice(&0u32.to_le_bytes());
    cmd
}

/// Build a calibration (offset compensation) command.
pub fn build_calibrate() -> Vec<u8> {
    vec![PowerControlOpcode::StartOffsetCompensation as u8]
}
