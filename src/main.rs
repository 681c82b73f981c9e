#[cfg(target_os = "espidf")]
mod config;
#[cfg(target_os = "espidf")]
mod network;
#[cfg(target_os = "espidf")]
mod ota;
#[cfg(target_os = "espidf")]
mod system;
mod version;

#[cfg(target_os = "espidf")]
mod app_desc {
    // Generate ESP-IDF app descriptor
    #![allow(unexpected_cfgs)]
    esp_idf_sys::esp_app_desc!();
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!(
        "{} runs on ESP32 only; use the update-core and host-tests crates on the host",
        version::version_info()
    );
}

#[cfg(target_os = "espidf")]
mod device {
    use crate::config::{self, Config};
    use crate::network::WifiManager;
    use crate::ota::{identity, EspHttpTransport, EspRestart, EspStorage};
    use crate::version;
    use anyhow::Result;
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::info;
    use update_core::events::from_fn;
    use update_core::{logging, HttpUpdater, Outcome, TargetKind, UpdateEndpoint, UpdateEvent, UpdateRequest};

    type Updater = HttpUpdater<EspStorage, EspRestart>;

    pub fn run() -> Result<()> {
        esp_idf_svc::sys::link_patches();

        logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
        info!("{}", version::version_info());
        info!("Boot reason: {}", crate::system::reset::get_reset_reason());
        if crate::system::reset::was_software_reset() {
            info!("Booted after a software restart");
        }

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let config = config::load_or_default(&nvs)?;
        if !logging::set_max_level_from_str(&config.log_level) {
            log::warn!("Unknown log level '{}', keeping {}", config.log_level, logging::current_max_level());
        }

        let mut wifi = WifiManager::new(peripherals.modem, sys_loop, nvs, &config.wifi_ssid, &config.wifi_password)?;
        wifi.connect()?;

        let mut storage = EspStorage::new()?.with_activity_led(config.update.activity_led)?;
        // Reaching the network means this image is good enough to keep
        if let Err(e) = storage.mark_running_slot_valid() {
            log::warn!("Could not mark running slot valid: {:?}", e);
        }

        let updater = HttpUpdater::new(storage, EspRestart::default(), config.update.clone());
        let endpoint = UpdateEndpoint::new(config.server_url.as_str(), config.api_key.as_str());
        let device_id = identity::device_id();
        info!("Device id: {}", device_id);

        loop {
            if let Err(e) = wifi.ensure_connected() {
                log::error!("WiFi unavailable, skipping update check: {:?}", e);
            } else {
                check_for_updates(&updater, &endpoint, &device_id, &config);
            }

            info!("Next update check in {} h", config.check_interval_hours.max(1));
            FreeRtos::delay_ms(config.check_interval_ms());
        }
    }

    /// Firmware first, then the data partition. A committed firmware image
    /// restarts the device before the data check runs.
    fn check_for_updates(updater: &Updater, endpoint: &UpdateEndpoint, device_id: &str, config: &Config) {
        for target in [TargetKind::Executable, TargetKind::AuxiliaryData] {
            let identity = identity::current(&*updater.storage());
            if target == TargetKind::AuxiliaryData && identity.free_data_space == 0 {
                log::debug!("No data partition, skipping data update");
                continue;
            }

            let url = endpoint.url(version::FIRMWARE_VERSION, device_id);
            let mut transport = EspHttpTransport::new(url);
            let mut last_percent = None;
            let mut listener = from_fn(|event: &UpdateEvent| match event {
                UpdateEvent::Start => info!("{} update started", target),
                UpdateEvent::Progress { .. } => {
                    let percent = event.percent().map(|p| p / 10 * 10);
                    if percent != last_percent {
                        last_percent = percent;
                        info!("{} progress: {}%", target, percent.unwrap_or(0));
                    }
                }
                UpdateEvent::End => info!("{} update finished", target),
                UpdateEvent::Error(e) => log::error!("{} update error {}: {}", target, e.code(), e),
            });

            let request = UpdateRequest {
                target,
                identity: &identity,
                current_version: version::FIRMWARE_VERSION,
            };
            match updater.apply(&request, &mut transport, &mut listener) {
                Outcome::Applied => {
                    info!("{} updated", target);
                    if target == TargetKind::Executable && !config.update.reboot_on_update {
                        info!("Reboot on update disabled; new firmware runs after the next restart");
                    }
                }
                Outcome::NoUpdateAvailable => info!("{} is up to date", target),
                Outcome::Failed(_) => log::warn!(
                    "{} update failed: {}",
                    target,
                    updater.last_error_string()
                ),
            }
        }
    }
}
