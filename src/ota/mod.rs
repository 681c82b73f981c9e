// ESP-IDF implementations of the updater collaborators
//
// Update flow:
// 1. Send identification headers to the update server
// 2. Stage the image in the next OTA slot (or the SPIFFS partition)
// 3. Verify MD5 and activate the slot
// 4. Restart into the new image

pub mod identity;
pub mod restart;
pub mod storage;
pub mod transport;

pub use restart::EspRestart;
pub use storage::EspStorage;
pub use transport::EspHttpTransport;
