//! Update Core - Hardware-independent logic for the ESP32 HTTP updater
//!
//! This crate contains the update protocol, the session state machine and the
//! storage/transport seams. It builds and tests on the host platform without
//! requiring ESP32 hardware; the firmware crate supplies the ESP-IDF adapters.

pub mod capacity;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod identity;
pub mod image;
pub mod integrity;
pub mod logging;
pub mod memory;
pub mod protocol;
pub mod restart;
pub mod storage;
pub mod transport;
pub mod updater;

pub use config::{ActivityLed, BasicAuth, UpdateConfig};
pub use endpoint::UpdateEndpoint;
pub use error::{StorageError, TransportError, UpdateError};
pub use events::{UpdateEvent, UpdateListener};
pub use identity::DeviceIdentity;
pub use memory::MemoryStorage;
pub use restart::{NoRestart, RestartTrigger};
pub use storage::{StorageTarget, TargetKind, WriteSession};
pub use transport::{BodyReader, Transport};
pub use updater::{HttpUpdater, Outcome, Phase, UpdateRequest};
