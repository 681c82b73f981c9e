use std::fs;
use std::path::Path;

/// `#define NAME "value"` lookup in a C header.
fn define(contents: &str, name: &str) -> Option<String> {
    let needle = format!("#define {} ", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&needle))
        .and_then(|l| l.split('"').nth(1))
        .map(str::to_string)
}

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    println!("cargo:rerun-if-changed=wifi_config.h");

    // Read WiFi and update server configuration if it exists
    let config_path = "wifi_config.h";
    let contents = if Path::new(config_path).exists() {
        fs::read_to_string(config_path)?
    } else {
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
        String::new()
    };

    for name in ["WIFI_SSID", "WIFI_PASSWORD", "UPDATE_SERVER_URL", "UPDATE_API_KEY"] {
        let value = define(&contents, name).unwrap_or_default();
        println!("cargo:rustc-env={}={}", name, value);
    }

    Ok(())
}
