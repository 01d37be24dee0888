// Server-driven update path.
//
// The whole flow runs on an owned worker thread so the HTTP task stays
// free to answer status polls while flash writes block. Fail-fast, no
// retries: the first error ends the attempt and restores the suspended
// background tasks.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::network::update_client::{FirmwareEntry, UpdateServer, VersionInfo};
use crate::platform::SystemControl;
use crate::system::tasks::TaskCoordinator;
use crate::version;

use super::session::SharedSession;
use super::{OtaError, OtaKind, OtaStatus};

/// Read-buffer size for the firmware stream.
const DOWNLOAD_CHUNK: usize = 1024;

/// Result of comparing our version against the server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpToDate { server: String },
    ServerOlder { server: String },
    UpdateAvailable { server: String },
}

/// Result of a full update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Image committed; the device is about to reboot.
    Applied,
    /// No newer firmware on the server; nothing was touched.
    Skipped(CheckOutcome),
}

pub struct ServerUpdater {
    session: SharedSession,
    coordinator: Arc<Mutex<TaskCoordinator>>,
    server: Arc<dyn UpdateServer>,
    system: Arc<dyn SystemControl>,
    current_version: String,
}

impl ServerUpdater {
    pub fn new(
        session: SharedSession,
        coordinator: Arc<Mutex<TaskCoordinator>>,
        server: Arc<dyn UpdateServer>,
        system: Arc<dyn SystemControl>,
    ) -> Self {
        Self {
            session,
            coordinator,
            server,
            system,
            current_version: version::FIRMWARE_VERSION.to_string(),
        }
    }

    /// Override the version used for the needs-update decision.
    pub fn with_current_version(mut self, current: &str) -> Self {
        self.current_version = current.to_string();
        self
    }

    /// Query the server's advertised version. Never starts a session and
    /// never touches background tasks.
    pub fn check_version(&self, base_url: &str) -> Result<CheckOutcome, OtaError> {
        let info = self.server.fetch_version_info(base_url)?;
        Ok(self.classify(&info))
    }

    /// Images the server offers for download.
    pub fn firmware_list(&self, base_url: &str) -> Result<Vec<FirmwareEntry>, OtaError> {
        self.server.fetch_firmware_list(base_url)
    }

    /// Full update flow, blocking the calling thread. Request handlers use
    /// `spawn_update` instead.
    pub fn run_update(
        &self,
        base_url: &str,
        firmware_file: &str,
    ) -> Result<UpdateOutcome, OtaError> {
        if self.session.lock().unwrap().status() != OtaStatus::Idle {
            return Err(OtaError::AlreadyInProgress);
        }
        let info = self.server.fetch_version_info(base_url)?;
        match self.classify(&info) {
            CheckOutcome::UpdateAvailable { server } => {
                log::info!(
                    "update available: {} -> {} ({firmware_file})",
                    self.current_version,
                    server
                );
            }
            outcome @ CheckOutcome::UpToDate { .. } => {
                log::info!("firmware up to date ({})", self.current_version);
                return Ok(UpdateOutcome::Skipped(outcome));
            }
            outcome @ CheckOutcome::ServerOlder { .. } => {
                log::info!(
                    "server offers older firmware than running {}; skipping",
                    self.current_version
                );
                return Ok(UpdateOutcome::Skipped(outcome));
            }
        }

        // Everything past this point runs with background tasks suspended;
        // every failure path must restore them.
        self.coordinator.lock().unwrap().stop_all();
        match self.download_and_flash(base_url, firmware_file, &info) {
            Ok(()) => Ok(UpdateOutcome::Applied),
            Err(err) => {
                self.session.lock().unwrap().abort();
                self.coordinator.lock().unwrap().restore_all();
                Err(err)
            }
        }
    }

    /// Run the update on an owned worker thread; the caller returns to
    /// serving requests immediately. Reboots the device on success.
    pub fn spawn_update(
        self: Arc<Self>,
        base_url: String,
        firmware_file: String,
    ) -> std::io::Result<thread::JoinHandle<Result<UpdateOutcome, OtaError>>> {
        let updater = self;
        thread::Builder::new()
            .name("ota-fetch".into())
            .spawn(move || {
                let result = updater.run_update(&base_url, &firmware_file);
                match &result {
                    Ok(UpdateOutcome::Applied) => {
                        log::info!("server update applied, rebooting");
                        updater.system.restart();
                    }
                    Ok(UpdateOutcome::Skipped(outcome)) => {
                        log::info!("server update skipped: {outcome:?}");
                    }
                    Err(err) => log::error!("server update failed: {err}"),
                }
                result
            })
    }

    fn classify(&self, info: &VersionInfo) -> CheckOutcome {
        use std::cmp::Ordering;
        match version::compare(&self.current_version, &info.version) {
            Ordering::Less => CheckOutcome::UpdateAvailable {
                server: info.version.clone(),
            },
            Ordering::Equal => CheckOutcome::UpToDate {
                server: info.version.clone(),
            },
            Ordering::Greater => CheckOutcome::ServerOlder {
                server: info.version.clone(),
            },
        }
    }

    fn download_and_flash(
        &self,
        base_url: &str,
        firmware_file: &str,
        info: &VersionInfo,
    ) -> Result<(), OtaError> {
        let download = self.server.fetch_firmware(base_url, firmware_file)?;
        if let Some(declared) = info.size {
            if declared != download.content_length {
                return Err(OtaError::ParseFailure(format!(
                    "version document declares {declared} bytes, server sent Content-Length {}",
                    download.content_length
                )));
            }
        }
        {
            let mut session = self.session.lock().unwrap();
            session.begin(download.content_length, OtaKind::Server)?;
            if let Some(checksum) = &info.checksum {
                session.set_expected_checksum(checksum);
            }
        }
        let mut body = download.body;
        let mut buf = [0u8; DOWNLOAD_CHUNK];
        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    return Err(OtaError::HttpFailure(format!("firmware stream: {err}")))
                }
            };
            self.session.lock().unwrap().write_chunk(&buf[..n])?;
        }
        self.session.lock().unwrap().end()?;
        Ok(())
    }
}
