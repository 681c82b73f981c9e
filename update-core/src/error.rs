//! Error taxonomy for an update session.
//!
//! Transport and storage failures are opaque codes owned by the collaborator
//! that produced them. Everything else is a closed set of protocol kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque failure reported by the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportError {
    pub code: i32,
}

impl TransportError {
    pub const CONNECTION_FAILED: i32 = -1;
    pub const API: i32 = -2;
    pub const TIMED_OUT: i32 = -3;
    pub const INVALID_RESPONSE: i32 = -4;

    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    pub const fn connection_failed() -> Self {
        Self::new(Self::CONNECTION_FAILED)
    }

    pub const fn timed_out() -> Self {
        Self::new(Self::TIMED_OUT)
    }

    pub const fn invalid_response() -> Self {
        Self::new(Self::INVALID_RESPONSE)
    }

    pub fn description(&self) -> &'static str {
        match self.code {
            Self::CONNECTION_FAILED => "connection failed",
            Self::API => "API misuse",
            Self::TIMED_OUT => "timed out",
            Self::INVALID_RESPONSE => "invalid response",
            _ => "transport failure",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code)
    }
}

impl std::error::Error for TransportError {}

/// Opaque failure reported by the storage target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageError {
    pub code: i32,
}

impl StorageError {
    pub const WRITE: i32 = 1;
    pub const ERASE: i32 = 2;
    pub const READ: i32 = 3;
    pub const SPACE: i32 = 4;
    pub const SIZE: i32 = 5;
    pub const STREAM: i32 = 6;
    pub const CHECKSUM_MISMATCH: i32 = 7;
    pub const MAGIC_BYTE: i32 = 8;
    pub const ACTIVATE: i32 = 9;
    pub const NO_PARTITION: i32 = 10;
    pub const BAD_ARGUMENT: i32 = 11;
    pub const ABORTED: i32 = 12;

    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        self.code == Self::CHECKSUM_MISMATCH
    }

    pub fn description(&self) -> &'static str {
        match self.code {
            Self::WRITE => "Flash Write Failed",
            Self::ERASE => "Flash Erase Failed",
            Self::READ => "Flash Read Failed",
            Self::SPACE => "Not Enough Space",
            Self::SIZE => "Bad Size Given",
            Self::STREAM => "Stream Read Timeout",
            Self::CHECKSUM_MISMATCH => "MD5 Check Failed",
            Self::MAGIC_BYTE => "Wrong Magic Byte",
            Self::ACTIVATE => "Could Not Activate The Firmware",
            Self::NO_PARTITION => "Partition Could Not be Found",
            Self::BAD_ARGUMENT => "Bad Argument",
            Self::ABORTED => "Aborted",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code)
    }
}

impl std::error::Error for StorageError {}

/// Why an update session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateError {
    Transport(TransportError),
    Storage(StorageError),
    InsufficientSpace,
    ServerDidNotReportSize,
    ServerFileNotFound,
    ServerForbidden,
    ServerWrongStatusCode,
    FaultyChecksum,
    BinaryHeaderVerificationFailed,
    /// Image header declares a flash chip larger than the device has.
    WrongFlashTarget,
    NoPartition,
    /// The transport ended before the declared length was received.
    Truncated { received: u64, expected: u64 },
    /// Another session already owns the storage target.
    SessionInProgress,
}

impl UpdateError {
    /// Legacy flat code: storage codes are positive, transport codes are
    /// small negatives and protocol kinds start at -100.
    pub fn code(&self) -> i32 {
        match self {
            UpdateError::Transport(e) => e.code,
            UpdateError::Storage(e) => e.code,
            UpdateError::InsufficientSpace => -100,
            UpdateError::ServerDidNotReportSize => -101,
            UpdateError::ServerFileNotFound => -102,
            UpdateError::ServerForbidden => -103,
            UpdateError::ServerWrongStatusCode => -104,
            UpdateError::FaultyChecksum => -105,
            UpdateError::BinaryHeaderVerificationFailed => -106,
            UpdateError::WrongFlashTarget => -107,
            UpdateError::NoPartition => -108,
            UpdateError::Truncated { .. } => StorageError::STREAM,
            UpdateError::SessionInProgress => -109,
        }
    }

    pub fn description(&self) -> String {
        match self {
            UpdateError::Transport(e) => format!("HTTP error: {}", e),
            UpdateError::Storage(e) => format!("Update error: {}", e.description()),
            UpdateError::InsufficientSpace => "Not Enough space".to_string(),
            UpdateError::ServerDidNotReportSize => "Server Did Not Report Size".to_string(),
            UpdateError::ServerFileNotFound => "File Not Found (404)".to_string(),
            UpdateError::ServerForbidden => "Forbidden (403)".to_string(),
            UpdateError::ServerWrongStatusCode => "Wrong HTTP Code".to_string(),
            UpdateError::FaultyChecksum => "Wrong MD5".to_string(),
            UpdateError::BinaryHeaderVerificationFailed => "Verify Bin Header Failed".to_string(),
            UpdateError::WrongFlashTarget => "New Binary Does Not Fit Flash Size".to_string(),
            UpdateError::NoPartition => "Partition Could Not be Found".to_string(),
            UpdateError::Truncated { received, expected } => {
                format!("Stream ended after {} of {} bytes", received, expected)
            }
            UpdateError::SessionInProgress => "Update Already In Progress".to_string(),
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Transport(e) => Some(e),
            UpdateError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for UpdateError {
    fn from(e: TransportError) -> Self {
        UpdateError::Transport(e)
    }
}

impl From<StorageError> for UpdateError {
    fn from(e: StorageError) -> Self {
        UpdateError::Storage(e)
    }
}
