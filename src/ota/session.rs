// OTA session state machine.
//
// One session object exists per device, created at boot and shared behind
// Arc<Mutex> between the upload callback and the server-fetch worker.
// Mutual exclusion between update attempts is structural: begin() is the
// only entry point that starts a session and it rejects anything but Idle.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::platform::FlashUpdate;

use super::progress::{self, LogSink, ProgressSink, ProgressUpdate, StatusSnapshot};
use super::space::SpaceGuard;
use super::{OtaError, OtaKind, OtaStatus};

/// Handle shared between the upload callback and the server-fetch worker.
pub type SharedSession = Arc<Mutex<OtaSession>>;

/// Minimum wall-clock gap between write-path progress notifications.
const NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

pub struct OtaSession {
    flash: Box<dyn FlashUpdate>,
    space: SpaceGuard,
    sink: Box<dyn ProgressSink>,
    status: OtaStatus,
    kind: Option<OtaKind>,
    total_size: u64,
    written_size: u64,
    last_error: Option<OtaError>,
    expected_checksum: Option<String>,
    digest: Option<String>,
    hasher: Sha256,
    flash_open: bool,
    last_notify: Option<Instant>,
}

impl OtaSession {
    pub fn new(flash: Box<dyn FlashUpdate>) -> Self {
        Self::with_sink(flash, Box::new(LogSink))
    }

    pub fn with_sink(flash: Box<dyn FlashUpdate>, sink: Box<dyn ProgressSink>) -> Self {
        Self {
            flash,
            space: SpaceGuard::default(),
            sink,
            status: OtaStatus::Idle,
            kind: None,
            total_size: 0,
            written_size: 0,
            last_error: None,
            expected_checksum: None,
            digest: None,
            hasher: Sha256::new(),
            flash_open: false,
            last_notify: None,
        }
    }

    pub fn shared(flash: Box<dyn FlashUpdate>) -> SharedSession {
        Arc::new(Mutex::new(Self::new(flash)))
    }

    pub fn status(&self) -> OtaStatus {
        self.status
    }

    pub fn kind(&self) -> Option<OtaKind> {
        self.kind
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn written_size(&self) -> u64 {
        self.written_size
    }

    pub fn last_error(&self) -> Option<&OtaError> {
        self.last_error.as_ref()
    }

    /// Hex SHA-256 of the accepted image, set by a successful end().
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Start a new session. `declared_size == 0` means the size is not
    /// known yet (local uploads report it at end of transfer).
    pub fn begin(&mut self, declared_size: u64, kind: OtaKind) -> Result<(), OtaError> {
        if self.status != OtaStatus::Idle {
            return Err(OtaError::AlreadyInProgress);
        }
        if declared_size > 0 {
            let free = self.flash.free_space();
            if let Err(err) = self.space.check(declared_size, free) {
                return Err(self.fail(err));
            }
        }
        let size = (declared_size > 0).then_some(declared_size);
        if let Err(err) = self.flash.begin(size) {
            return Err(self.fail(OtaError::BeginFailure(err.to_string())));
        }
        self.flash_open = true;
        self.written_size = 0;
        self.total_size = declared_size;
        self.kind = Some(kind);
        self.last_error = None;
        self.expected_checksum = None;
        self.digest = None;
        self.hasher = Sha256::new();
        self.status = match kind {
            OtaKind::Local => OtaStatus::Uploading,
            OtaKind::Server => OtaStatus::Downloading,
        };
        log::info!(
            "OTA session started: {} update, declared size {} bytes",
            kind.as_str(),
            declared_size
        );
        self.notify();
        Ok(())
    }

    /// Feed one chunk of image bytes to the flash writer. A short write is
    /// fatal to the session: flash state is inconsistent past that point.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), OtaError> {
        if !self.status.is_active() {
            return Err(OtaError::NotInProgress);
        }
        if data.is_empty() {
            return Ok(());
        }
        let after = self.written_size + data.len() as u64;
        if self.total_size != 0 && after > self.total_size {
            return Err(self.fail(OtaError::SizeMismatch {
                expected: self.total_size,
                written: after,
            }));
        }
        let accepted = match self.flash.write(data) {
            Ok(n) => n,
            Err(err) => return Err(self.fail(OtaError::WriteFailure(err.to_string()))),
        };
        if accepted < data.len() {
            return Err(self.fail(OtaError::WriteFailure(format!(
                "short write: {} of {} bytes",
                accepted,
                data.len()
            ))));
        }
        self.hasher.update(data);
        self.written_size = after;
        if self.status != OtaStatus::Writing {
            self.status = OtaStatus::Writing;
            self.notify();
        } else {
            self.notify_throttled();
        }
        Ok(())
    }

    /// Record the real image size once the upload callback knows it. Only
    /// meaningful on the local path, after the transfer has completed, so
    /// the reported size must already match the written byte count.
    pub fn set_actual_size(&mut self, size: u64) -> Result<(), OtaError> {
        match self.status {
            OtaStatus::Uploading | OtaStatus::Writing => {}
            _ => return Err(OtaError::NotInProgress),
        }
        if size == 0 {
            return Err(self.fail(OtaError::InvalidSize));
        }
        let free = self.flash.free_space();
        if let Err(err) = self.space.check(size, free) {
            return Err(self.fail(err));
        }
        if self.written_size != size {
            return Err(self.fail(OtaError::SizeMismatch {
                expected: size,
                written: self.written_size,
            }));
        }
        self.total_size = size;
        log::debug!("upload size reported: {size} bytes");
        Ok(())
    }

    /// Digest the update server advertises for the image; verified against
    /// the running hash before commit.
    pub fn set_expected_checksum(&mut self, hex_digest: &str) {
        self.expected_checksum = Some(hex_digest.to_string());
    }

    /// Commit the written image. With no size declared up front the
    /// written byte count becomes the final size.
    pub fn end(&mut self) -> Result<(), OtaError> {
        match self.status {
            OtaStatus::Uploading | OtaStatus::Downloading | OtaStatus::Writing => {}
            OtaStatus::Failed => {
                return Err(self.last_error.clone().unwrap_or(OtaError::Aborted));
            }
            other => return Err(OtaError::WrongState(other)),
        }
        if self.written_size == 0 {
            return Err(self.fail(OtaError::NoDataWritten));
        }
        if self.total_size == 0 {
            self.total_size = self.written_size;
        }
        if self.written_size != self.total_size {
            return Err(self.fail(OtaError::SizeMismatch {
                expected: self.total_size,
                written: self.written_size,
            }));
        }
        let computed = hex::encode(self.hasher.finalize_reset());
        if let Some(expected) = self.expected_checksum.clone() {
            if !expected.eq_ignore_ascii_case(&computed) {
                return Err(self.fail(OtaError::ChecksumMismatch { expected, computed }));
            }
        }
        if let Err(err) = self.flash.commit() {
            return Err(self.fail(OtaError::CommitFailure(err.to_string())));
        }
        self.flash_open = false;
        self.digest = Some(computed);
        self.status = OtaStatus::Success;
        log::info!(
            "OTA update committed: {} bytes, sha256 {}",
            self.written_size,
            self.digest.as_deref().unwrap_or("")
        );
        self.notify();
        Ok(())
    }

    /// Cancel an active session; no-op in any other state. Returns whether
    /// this call performed the transition.
    pub fn abort(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.fail(OtaError::Aborted);
        true
    }

    /// Return a terminal session to Idle so a new begin() is accepted.
    pub fn reset(&mut self) -> Result<(), OtaError> {
        if self.status.is_active() {
            return Err(OtaError::AlreadyInProgress);
        }
        self.status = OtaStatus::Idle;
        self.kind = None;
        self.total_size = 0;
        self.written_size = 0;
        self.last_error = None;
        self.expected_checksum = None;
        self.digest = None;
        self.hasher = Sha256::new();
        self.last_notify = None;
        Ok(())
    }

    /// Percent complete; heuristic while the total size is unknown.
    pub fn progress(&self) -> f32 {
        progress::percent(self.total_size, self.written_size)
    }

    /// Point-in-time view for the HTTP status route.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status.as_str(),
            message: progress::message(self.status).to_string(),
            progress: progress::rounded(self.progress()),
            total_size: self.total_size,
            written_size: self.written_size,
            ota_type: self.kind.map(OtaKind::as_str),
            error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn fail(&mut self, err: OtaError) -> OtaError {
        if self.flash_open {
            self.flash.abort();
            self.flash_open = false;
        }
        log::error!("OTA update failed: {err}");
        self.status = OtaStatus::Failed;
        self.last_error = Some(err.clone());
        self.notify();
        err
    }

    fn notify(&mut self) {
        self.last_notify = Some(Instant::now());
        let update = ProgressUpdate {
            code: self.status.code(),
            status: self.status,
            phrase: progress::phrase(self.status),
            progress: progress::rounded(self.progress()),
            total_size: self.total_size,
            written_size: self.written_size,
            error: self.last_error.as_ref().map(|e| e.to_string()),
        };
        self.sink.on_update(&update);
    }

    fn notify_throttled(&mut self) {
        let due = self
            .last_notify
            .map_or(true, |at| at.elapsed() >= NOTIFY_INTERVAL);
        if due {
            self.notify();
        }
    }
}

impl Drop for OtaSession {
    fn drop(&mut self) {
        if self.flash_open {
            self.flash.abort();
        }
    }
}
