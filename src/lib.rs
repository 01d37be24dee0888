//! Firmware core for a WiFi-connected smart display panel.
//!
//! This crate holds the hardware-independent logic, centered on the OTA
//! update engine: a single-session state machine fed either by a local
//! HTTP firmware upload or by a pull from a remote update server, with
//! background-task suspension around the update window. The LCD driver,
//! WiFi manager, HTTP route table, and key-value store live outside this
//! crate and connect through the traits in [`platform`], [`config`],
//! [`system::tasks`], [`network::update_client`], and [`ota::progress`].

pub mod config;
pub mod logging;
pub mod network;
pub mod ota;
pub mod platform;
pub mod system;
pub mod version;
