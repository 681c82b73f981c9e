//! Integrity checks applied before the first byte reaches storage.
//!
//! The digest itself is verified by the storage session at finalize; this
//! module only makes sure the expectation is installed and that executable
//! images start like executable images.

use crate::error::UpdateError;
use crate::image::{ImageHeader, ESP_IMAGE_MAGIC, IMAGE_HEADER_LEN};
use crate::storage::{TargetKind, WriteSession};
use crate::transport::{BodyReader, Transport};
use heapless::String as HString;
use std::fmt;

pub const MD5_HEX_LEN: usize = 32;

/// An MD5 digest in canonical form: 32 lower-case hex digits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Checksum(HString<MD5_HEX_LEN>);

impl Checksum {
    /// Canonicalise a checksum header value. Empty input means no checksum.
    pub fn from_header(raw: &str) -> Result<Option<Self>, UpdateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let mut digest = [0u8; MD5_HEX_LEN / 2];
        hex::decode_to_slice(raw, &mut digest).map_err(|_| UpdateError::FaultyChecksum)?;
        let mut canonical = HString::new();
        canonical
            .push_str(&hex::encode(digest))
            .map_err(|_| UpdateError::FaultyChecksum)?;
        Ok(Some(Self(canonical)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.as_str())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the expected checksum of one session.
#[derive(Debug, Default)]
pub struct IntegrityGuard {
    expected: Option<Checksum>,
    armed: bool,
}

impl IntegrityGuard {
    pub fn new(expected: Option<Checksum>) -> Self {
        Self { expected, armed: false }
    }

    pub fn expected(&self) -> Option<&Checksum> {
        self.expected.as_ref()
    }

    /// True once the expectation is installed, or when there is none.
    pub fn is_armed(&self) -> bool {
        self.armed || self.expected.is_none()
    }

    /// Install the expected checksum on a session that has not been
    /// written to yet.
    pub fn arm<W: WriteSession>(&mut self, session: &mut W) -> Result<(), UpdateError> {
        let Some(expected) = self.expected.as_ref() else {
            return Ok(());
        };
        session.set_checksum(expected.as_str()).map_err(|e| {
            log::error!("Setting checksum {} failed: {}", expected, e);
            UpdateError::FaultyChecksum
        })?;
        log::debug!("Expected MD5 armed: {}", expected);
        self.armed = true;
        Ok(())
    }
}

/// Inspect the head of the body without consuming it.
///
/// Executable images must start with [`ESP_IMAGE_MAGIC`]. When `chip_size`
/// is given, an image built for a larger flash chip is refused too.
/// Auxiliary data is not inspected.
pub fn verify_image_head<T: Transport + ?Sized>(
    target: TargetKind,
    body: &mut BodyReader<'_, T>,
    chip_size: Option<u64>,
) -> Result<(), UpdateError> {
    if target != TargetKind::Executable {
        return Ok(());
    }

    let want = if chip_size.is_some() { IMAGE_HEADER_LEN } else { 1 };
    let head = body.peek(want)?;

    match head.first() {
        Some(&ESP_IMAGE_MAGIC) => {}
        Some(other) => {
            log::error!("Magic header does not start with 0x{:02X} (got 0x{:02X})", ESP_IMAGE_MAGIC, other);
            return Err(UpdateError::BinaryHeaderVerificationFailed);
        }
        None => {
            log::error!("Body ended before the magic header");
            return Err(UpdateError::BinaryHeaderVerificationFailed);
        }
    }

    if let Some(chip_size) = chip_size {
        let header = ImageHeader::parse(head).ok_or(UpdateError::BinaryHeaderVerificationFailed)?;
        match header.flash_size() {
            Some(image_flash) if image_flash <= chip_size => {}
            Some(image_flash) => {
                log::error!("New binary needs {} bytes of flash, chip has {}", image_flash, chip_size);
                return Err(UpdateError::WrongFlashTarget);
            }
            None => {
                log::error!("Unknown flash size code {}", header.flash_size_code());
                return Err(UpdateError::WrongFlashTarget);
            }
        }
    }

    Ok(())
}
