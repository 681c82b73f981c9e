use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use serde::{Deserialize, Serialize};
use update_core::UpdateConfig;

const CONFIG_NAMESPACE: &str = "updater";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_SIZE: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // Update server
    pub server_url: String,
    pub api_key: String,
    pub check_interval_hours: u32,

    pub log_level: String,
    pub update: UpdateConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Compiled-in values come from wifi_config.h via build.rs
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");

        log::info!(
            "Config default: SSID='{}', Password={}",
            wifi_ssid,
            if wifi_password.is_empty() { "<empty>" } else { "<set>" }
        );

        Self {
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            server_url: env!("UPDATE_SERVER_URL").to_string(),
            api_key: env!("UPDATE_API_KEY").to_string(),
            check_interval_hours: 24,
            log_level: "info".to_string(),
            update: UpdateConfig::default(),
        }
    }
}

impl Config {
    pub fn save(&self, nvs: &EspDefaultNvsPartition) -> Result<()> {
        let mut store = open(nvs)?;
        let json = serde_json::to_vec(self)?;
        store.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }

    /// Update check period, never shorter than an hour.
    pub fn check_interval_ms(&self) -> u32 {
        self.check_interval_hours.max(1).saturating_mul(3_600_000)
    }
}

pub fn load_or_default(nvs: &EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");

            // Empty fields in NVS fall back to the compiled-in values
            let defaults = Config::default();
            let mut patched = false;
            if config.wifi_ssid.is_empty() {
                log::warn!("NVS WiFi credentials empty, using compiled defaults: SSID='{}'", defaults.wifi_ssid);
                config.wifi_ssid = defaults.wifi_ssid;
                config.wifi_password = defaults.wifi_password;
                patched = true;
            }
            if config.server_url.is_empty() || config.api_key.is_empty() {
                log::warn!("NVS update server settings empty, using compiled defaults");
                config.server_url = defaults.server_url;
                config.api_key = defaults.api_key;
                patched = true;
            }

            if patched {
                if let Err(e) = config.save(nvs) {
                    log::warn!("Failed to save patched config: {:?}", e);
                }
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            if let Err(save_err) = config.save(nvs) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

fn open(nvs: &EspDefaultNvsPartition) -> Result<EspNvs<NvsDefault>> {
    Ok(EspNvs::new(nvs.clone(), CONFIG_NAMESPACE, true)?)
}

fn load_from_nvs(nvs: &EspDefaultNvsPartition) -> Result<Config> {
    let store = open(nvs)?;

    let mut buf = vec![0u8; MAX_CONFIG_SIZE];
    let data = store
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    Ok(serde_json::from_slice(data)?)
}
