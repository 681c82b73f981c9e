use esp_idf_hal::delay::FreeRtos;
use update_core::RestartTrigger;

/// Reboots via `esp_restart` after letting pending log output drain.
pub struct EspRestart {
    pub delay_ms: u32,
}

impl Default for EspRestart {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

impl RestartTrigger for EspRestart {
    fn restart(&self) {
        log::info!("Restarting in {} ms", self.delay_ms);
        log::logger().flush();
        FreeRtos::delay_ms(self.delay_ms);

        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}
