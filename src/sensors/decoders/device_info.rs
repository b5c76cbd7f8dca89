//! Device Information Service (0x180A) values.

use serde::{Deserialize, Serialize};

/// Vendor id of Shimano in the Bluetooth SIG company identifier list.
pub const SHIMANO_VENDOR_ID: u16 = 0x009A;

/// PnP ID characteristic (0x2A50).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnpId {
    /// 1 = Bluetooth SIG, 2 = USB Implementer's Forum
    pub vendor_id_source: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

impl PnpId {
    /// Parse the 7-byte PnP ID value. Shorter values are rejected.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let bytes: &[u8; 7] = data.get(..7)?.try_into().ok()?;
        Some(Self {
            vendor_id_source: bytes[0],
            vendor_id: u16::from_le_bytes([bytes[1], bytes[2]]),
            product_id: u16::from_le_bytes([bytes[3], bytes[4]]),
            product_version: u16::from_le_bytes([bytes[5], bytes[6]]),
        })
    }
}

/// Values read from the Device Information Service. Every field is
/// optional; devices expose whatever subset they like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
    pub pnp: Option<PnpId>,
}

impl DeviceInformation {
    /// Whether nothing could be read.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Decode a UTF-8 string characteristic, trimming NUL padding.
pub fn decode_string(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    let text = text.trim_end_matches('\0').trim();
    (!text.is_empty()).then(|| text.to_string())
}
