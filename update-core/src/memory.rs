//! RAM-backed storage target.
//!
//! Behaves like the flash-backed targets on the device: writes are staged,
//! the MD5 is checked at finalize and only a verified image replaces the
//! committed one. Useful for host simulation and tests.

use crate::error::StorageError;
use crate::identity::DeviceIdentity;
use crate::storage::{StorageTarget, TargetKind, WriteSession};
use md5::Md5;
use sha2::{Digest, Sha256};

#[derive(Debug, Default)]
struct Slot {
    capacity: u64,
    image: Vec<u8>,
    commits: usize,
}

#[derive(Debug)]
pub struct MemoryStorage {
    executable: Slot,
    data: Option<Slot>,
}

impl MemoryStorage {
    /// Storage with an executable slot of `executable_capacity` bytes and no
    /// data partition.
    pub fn new(executable_capacity: u64) -> Self {
        Self {
            executable: Slot { capacity: executable_capacity, ..Default::default() },
            data: None,
        }
    }

    pub fn with_data_partition(mut self, capacity: u64) -> Self {
        self.data = Some(Slot { capacity, ..Default::default() });
        self
    }

    /// Last committed image for `kind`.
    pub fn image(&self, kind: TargetKind) -> Option<&[u8]> {
        self.slot(kind).map(|slot| slot.image.as_slice())
    }

    /// Number of successful commits for `kind`.
    pub fn commits(&self, kind: TargetKind) -> usize {
        self.slot(kind).map_or(0, |slot| slot.commits)
    }

    /// MD5 of the committed executable image, lower-case hex.
    pub fn executable_md5(&self) -> Option<String> {
        if self.executable.image.is_empty() {
            return None;
        }
        Some(hex::encode(Md5::digest(&self.executable.image)))
    }

    /// SHA-256 of the committed executable image, upper-case hex.
    pub fn executable_sha256(&self) -> Option<String> {
        if self.executable.image.is_empty() {
            return None;
        }
        Some(hex::encode_upper(Sha256::digest(&self.executable.image)))
    }

    /// Identity of a device whose running image is the committed
    /// executable. Flash size and SDK version are left for the caller.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            free_sketch_space: self.executable.capacity,
            free_data_space: self.data.as_ref().map_or(0, |slot| slot.capacity),
            sketch_size: self.executable.image.len() as u64,
            sketch_md5: self.executable_md5(),
            sketch_sha256: self.executable_sha256(),
            ..Default::default()
        }
    }

    fn slot(&self, kind: TargetKind) -> Option<&Slot> {
        match kind {
            TargetKind::Executable => Some(&self.executable),
            TargetKind::AuxiliaryData => self.data.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: TargetKind) -> Option<&mut Slot> {
        match kind {
            TargetKind::Executable => Some(&mut self.executable),
            TargetKind::AuxiliaryData => self.data.as_mut(),
        }
    }
}

impl StorageTarget for MemoryStorage {
    type Session<'a> = MemorySession<'a>;

    fn capacity_for(&self, kind: TargetKind) -> Option<u64> {
        self.slot(kind).map(|slot| slot.capacity)
    }

    fn begin_write(&mut self, kind: TargetKind, size: u64) -> Result<MemorySession<'_>, StorageError> {
        let slot = self
            .slot_mut(kind)
            .filter(|slot| slot.capacity > 0)
            .ok_or(StorageError::new(StorageError::NO_PARTITION))?;
        if size == 0 {
            return Err(StorageError::new(StorageError::SIZE));
        }
        if size > slot.capacity {
            return Err(StorageError::new(StorageError::SPACE));
        }
        Ok(MemorySession {
            slot,
            size,
            staged: Vec::new(),
            hasher: Md5::new(),
            expected_md5: None,
        })
    }
}

pub struct MemorySession<'a> {
    slot: &'a mut Slot,
    size: u64,
    staged: Vec<u8>,
    hasher: Md5,
    expected_md5: Option<String>,
}

impl WriteSession for MemorySession<'_> {
    fn set_checksum(&mut self, md5_hex: &str) -> Result<(), StorageError> {
        if !self.staged.is_empty() || md5_hex.len() != 32 {
            return Err(StorageError::new(StorageError::BAD_ARGUMENT));
        }
        self.expected_md5 = Some(md5_hex.to_ascii_lowercase());
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, StorageError> {
        if self.staged.len() as u64 + bytes.len() as u64 > self.size {
            return Err(StorageError::new(StorageError::SPACE));
        }
        self.hasher.update(bytes);
        self.staged.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn finalize(self) -> Result<(), StorageError> {
        if self.staged.len() as u64 != self.size {
            return Err(StorageError::new(StorageError::SIZE));
        }
        let actual = hex::encode(self.hasher.finalize());
        if let Some(expected) = &self.expected_md5 {
            if *expected != actual {
                log::error!("MD5 mismatch: expected {}, calculated {}", expected, actual);
                return Err(StorageError::new(StorageError::CHECKSUM_MISMATCH));
            }
        }
        self.slot.image = self.staged;
        self.slot.commits += 1;
        Ok(())
    }

    fn abort(self) -> Result<(), StorageError> {
        log::debug!("Discarding {} staged bytes", self.staged.len());
        Ok(())
    }
}
