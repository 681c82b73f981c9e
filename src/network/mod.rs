pub mod wifi;

pub use wifi::WifiManager;
