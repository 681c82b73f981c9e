//! Updater configuration that can be tested independently

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

/// LED driven while image bytes are written to flash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityLed {
    pub pin: i32,
    /// Output level that lights the LED.
    pub on_level: u8,
}

impl ActivityLed {
    /// GPIO level for the lit or dark state.
    pub fn level(&self, lit: bool) -> u32 {
        let on = u32::from(self.on_level != 0);
        if lit {
            on
        } else {
            on ^ 1
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateConfig {
    /// How long to wait for the response status and headers.
    pub response_timeout_ms: u32,
    /// Restart after a committed executable image.
    pub reboot_on_update: bool,
    /// Streaming buffer size in bytes.
    pub chunk_size: usize,
    /// Refuse executable images built for a larger flash chip.
    pub verify_flash_size: bool,
    pub credentials: Option<BasicAuth>,
    pub activity_led: Option<ActivityLed>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 8000,
            reboot_on_update: true,
            chunk_size: 4096,
            verify_flash_size: false,
            credentials: None,
            activity_led: None,
        }
    }
}

impl UpdateConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms as u64)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
