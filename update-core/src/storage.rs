//! Persistent storage the image is staged into.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which storage region an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// The primary executable (application) image.
    Executable,
    /// An auxiliary data image such as a SPIFFS partition.
    AuxiliaryData,
}

impl TargetKind {
    /// Value of the `x-ESP32-mode` request header.
    pub fn mode(&self) -> &'static str {
        match self {
            TargetKind::Executable => "sketch",
            TargetKind::AuxiliaryData => "spiffs",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Executable => f.write_str("firmware"),
            TargetKind::AuxiliaryData => f.write_str("data"),
        }
    }
}

/// Storage with one write slot per target kind.
pub trait StorageTarget {
    type Session<'a>: WriteSession
    where
        Self: 'a;

    /// Bytes available to an image of this kind, `None` when the device has
    /// no such partition.
    fn capacity_for(&self, kind: TargetKind) -> Option<u64>;

    /// Open a staged write of `size` bytes.
    fn begin_write(&mut self, kind: TargetKind, size: u64) -> Result<Self::Session<'_>, StorageError>;
}

/// A staged write. Nothing becomes visible until [`WriteSession::finalize`]
/// succeeds.
pub trait WriteSession {
    /// Install the expected MD5 (32 lower-case hex digits). Must be called
    /// before the first write.
    fn set_checksum(&mut self, md5_hex: &str) -> Result<(), StorageError>;

    /// Append bytes, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, StorageError>;

    /// Verify and commit the staged image.
    fn finalize(self) -> Result<(), StorageError>;

    /// Discard the session without committing.
    fn abort(self) -> Result<(), StorageError>;
}

/// Invalidate a staged image that failed verification. The verification
/// error is what the caller sees, even when the discard itself fails.
pub fn reject_staged<F>(discard: F, error: i32) -> Result<(), StorageError>
where
    F: FnOnce() -> Result<(), StorageError>,
{
    if let Err(e) = discard() {
        log::warn!("Could not discard rejected image: {}", e);
    }
    Err(StorageError::new(error))
}
