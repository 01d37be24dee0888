// Network-facing pieces of the firmware core. WiFi management and the
// on-device HTTP server live outside this crate; only the update-server
// client is ours.

pub mod update_client;

pub use update_client::{FirmwareDownload, FirmwareEntry, HttpUpdateServer, UpdateServer, VersionInfo};
