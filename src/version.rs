// Centralized version information

/// Version reported to the update server as `x-ESP32-version`.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version_info() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), FIRMWARE_VERSION)
}
