//! Electronic shifting (Shimano Di2 style) gear position decoding and
//! shift commands.
//!
//! The vendor format is undocumented. The layout below is a best guess:
//! byte 0 front gear, byte 1 rear gear, byte 2 battery percentage. Values
//! decoded here are advisory.

use super::{DecodeError, FieldReader};

/// Decoded gear position notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShifterData {
    pub front_gear: Option<u8>,
    pub rear_gear: Option<u8>,
    pub battery_level: Option<u8>,
}

/// Parse a gear position notification. At least one byte is required.
pub fn parse_shifter_data(data: &[u8]) -> Result<ShifterData, DecodeError> {
    let mut reader = FieldReader::new(data);
    reader.require(1)?;

    Ok(ShifterData {
        front_gear: reader.u8(),
        rear_gear: reader.u8(),
        battery_level: reader.u8(),
    })
}

/// Shift direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    Up,
    Down,
}

/// Which derailleur to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derailleur {
    Front,
    Rear,
}

/// Build a shift command: `[derailleur, direction]`.
pub fn build_shift(derailleur: Derailleur, direction: ShiftDirection) -> Vec<u8> {
    let derailleur = match derailleur {
        Derailleur::Front => 0x01,
        Derailleur::Rear => 0x02,
    };
    let direction = match direction {
        ShiftDirection::Up => 0x01,
        ShiftDirection::Down => 0x02,
    };
    vec![derailleur, direction]
}
