// Device facts reported to the update server

use core::ffi::CStr;
use esp_idf_sys::{
    esp_efuse_mac_get_default, esp_flash_get_size, esp_get_idf_version, esp_ota_get_running_partition,
    esp_partition_get_sha256, ESP_OK,
};
use update_core::identity::chip_id;
use update_core::{DeviceIdentity, StorageTarget, TargetKind};

fn running_image_sha256() -> Option<String> {
    let running = unsafe { esp_ota_get_running_partition() };
    if running.is_null() {
        return None;
    }
    let mut digest = [0u8; 32];
    let result = unsafe { esp_partition_get_sha256(running, digest.as_mut_ptr()) };
    (result == ESP_OK as i32).then(|| hex::encode_upper(digest))
}

fn running_partition_size() -> u64 {
    let running = unsafe { esp_ota_get_running_partition() };
    if running.is_null() {
        return 0;
    }
    unsafe { (*running).size as u64 }
}

fn flash_chip_size() -> u64 {
    let mut size: u32 = 0;
    // A null chip selects the default flash chip
    let result = unsafe { esp_flash_get_size(core::ptr::null_mut(), &mut size) };
    if result != ESP_OK as i32 {
        log::warn!("Could not read flash size: {}", result);
        return 0;
    }
    size as u64
}

fn sdk_version() -> String {
    let raw = unsafe { esp_get_idf_version() };
    if raw.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
}

/// Snapshot of the running device, taken right before each update check.
pub fn current<S: StorageTarget>(storage: &S) -> DeviceIdentity {
    DeviceIdentity {
        free_sketch_space: storage.capacity_for(TargetKind::Executable).unwrap_or(0),
        free_data_space: storage.capacity_for(TargetKind::AuxiliaryData).unwrap_or(0),
        sketch_size: running_partition_size(),
        sketch_md5: None,
        sketch_sha256: running_image_sha256(),
        chip_size: flash_chip_size(),
        sdk_version: sdk_version(),
    }
}

/// Factory MAC based device id for the update URL.
pub fn device_id() -> String {
    let mut mac = [0u8; 6];
    let result = unsafe { esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if result != ESP_OK as i32 {
        log::warn!("Could not read factory MAC: {}", result);
    }
    chip_id(mac)
}
