//! Pre-flight check that a declared image fits its storage target.
//!
//! This is a point-in-time check, not a reservation: the storage layer can
//! still run out of space while writing.

use crate::error::UpdateError;
use crate::storage::{StorageTarget, TargetKind};

pub fn validate<S: StorageTarget + ?Sized>(
    target: TargetKind,
    declared_len: u64,
    storage: &S,
) -> Result<(), UpdateError> {
    let capacity = match storage.capacity_for(target) {
        // A zero-sized executable slot means there is no OTA slot at all.
        None | Some(0) if target == TargetKind::Executable => {
            log::error!("No free {} slot", target);
            return Err(UpdateError::NoPartition);
        }
        None => {
            log::error!("No {} partition found", target);
            return Err(UpdateError::NoPartition);
        }
        Some(capacity) => capacity,
    };

    if declared_len > capacity {
        log::error!("{} space too low ({}) needed: {}", target, capacity, declared_len);
        return Err(UpdateError::InsufficientSpace);
    }

    log::debug!("{} image of {} bytes fits in {} bytes", target, declared_len, capacity);
    Ok(())
}
