// OTA (Over-The-Air) update engine.
//
// One session at a time: begin() -> write_chunk()* -> end(), fed either by
// the local HTTP upload callback (upload) or by the server-fetch worker
// (server). Background subsystems are suspended around the update window
// by the task coordinator.

pub mod progress;
pub mod server;
pub mod session;
pub mod space;
pub mod upload;

pub use progress::{ProgressSink, ProgressUpdate, StatusSnapshot};
pub use server::{CheckOutcome, ServerUpdater, UpdateOutcome};
pub use session::{OtaSession, SharedSession};
pub use space::SpaceGuard;
pub use upload::UploadHandler;

use thiserror::Error;

/// Session status, one value per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaStatus {
    Idle,
    Uploading,
    Downloading,
    Writing,
    Success,
    Failed,
}

impl OtaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OtaStatus::Idle => "idle",
            OtaStatus::Uploading => "uploading",
            OtaStatus::Downloading => "downloading",
            OtaStatus::Writing => "writing",
            OtaStatus::Success => "success",
            OtaStatus::Failed => "failed",
        }
    }

    /// Numeric code pushed to the display layer.
    pub fn code(self) -> u8 {
        match self {
            OtaStatus::Idle => 0,
            OtaStatus::Uploading => 1,
            OtaStatus::Downloading => 2,
            OtaStatus::Writing => 3,
            OtaStatus::Success => 4,
            OtaStatus::Failed => 5,
        }
    }

    /// True for the states in which bytes may still arrive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OtaStatus::Uploading | OtaStatus::Downloading | OtaStatus::Writing
        )
    }
}

/// Where the image bytes come from. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaKind {
    Local,
    Server,
}

impl OtaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OtaKind::Local => "local",
            OtaKind::Server => "server",
        }
    }
}

/// Session-local failures. None of these is fatal to the device; the
/// caller observes `Failed`, resets the session, and may try again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    #[error("update already in progress")]
    AlreadyInProgress,
    #[error("not enough flash space: need {needed} bytes, {free} free")]
    InsufficientSpace { needed: u64, free: u64 },
    #[error("no update in progress")]
    NotInProgress,
    #[error("operation not valid in {} state", .0.as_str())]
    WrongState(OtaStatus),
    #[error("invalid image size")]
    InvalidSize,
    #[error("size mismatch: expected {expected} bytes, wrote {written}")]
    SizeMismatch { expected: u64, written: u64 },
    #[error("no data written")]
    NoDataWritten,
    #[error("flash begin failed: {0}")]
    BeginFailure(String),
    #[error("flash write failed: {0}")]
    WriteFailure(String),
    #[error("flash commit failed: {0}")]
    CommitFailure(String),
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("update server request failed: {0}")]
    HttpFailure(String),
    #[error("update server response invalid: {0}")]
    ParseFailure(String),
    #[error("update aborted")]
    Aborted,
}
