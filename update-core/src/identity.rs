//! Read-only facts about the device sent along with every update check

use crate::storage::TargetKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Free bytes in the next executable slot.
    pub free_sketch_space: u64,
    /// Size of the auxiliary data partition, 0 if there is none.
    pub free_data_space: u64,
    /// Size of the running executable image.
    pub sketch_size: u64,
    /// MD5 of the running image, lower-case hex.
    pub sketch_md5: Option<String>,
    /// SHA-256 of the running image, upper-case hex.
    pub sketch_sha256: Option<String>,
    /// Flash chip size in bytes.
    pub chip_size: u64,
    pub sdk_version: String,
}

impl DeviceIdentity {
    pub fn free_space(&self, target: TargetKind) -> u64 {
        match target {
            TargetKind::Executable => self.free_sketch_space,
            TargetKind::AuxiliaryData => self.free_data_space,
        }
    }
}

/// Device id used in update URLs: the factory MAC read as a little-endian
/// integer, high word then low word, in unpadded hex.
pub fn chip_id(mac: [u8; 6]) -> String {
    let mut raw = [0u8; 8];
    raw[..6].copy_from_slice(&mac);
    let value = u64::from_le_bytes(raw);
    format!("{:x}{:x}", (value >> 32) as u32, value as u32)
}
