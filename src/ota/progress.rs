// Progress math and outbound notifications.

use serde::Serialize;

use super::OtaStatus;

const MIB: u64 = 1024 * 1024;

/// Percent complete for the current byte counts. With the total still
/// unknown (streamed uploads) this falls back to the banded estimate.
pub fn percent(total: u64, written: u64) -> f32 {
    if total > 0 {
        ((written as f64 / total as f64) * 100.0).min(100.0) as f32
    } else {
        estimate_unknown_total(written)
    }
}

/// Progress estimate while the image size is unknown. Linear ramp across
/// four byte bands, capped at 99 so the final size report still lands as
/// a visible jump to 100.
pub fn estimate_unknown_total(written: u64) -> f32 {
    let pct = if written < MIB {
        (written as f64 / MIB as f64) * 30.0
    } else if written < 3 * MIB {
        30.0 + ((written - MIB) as f64 / (2 * MIB) as f64) * 40.0
    } else if written < 6 * MIB {
        70.0 + ((written - 3 * MIB) as f64 / (3 * MIB) as f64) * 25.0
    } else {
        95.0
    };
    (pct as f32).min(99.0)
}

/// One-decimal value for status reporting.
pub fn rounded(pct: f32) -> f32 {
    (pct * 10.0).round() / 10.0
}

/// Short phrase shown on the panel next to the progress bar.
pub fn phrase(status: OtaStatus) -> &'static str {
    match status {
        OtaStatus::Idle => "idle",
        OtaStatus::Uploading => "receiving upload",
        OtaStatus::Downloading => "downloading firmware",
        OtaStatus::Writing => "writing flash",
        OtaStatus::Success => "update complete",
        OtaStatus::Failed => "update failed",
    }
}

/// Sentence for the HTTP status route.
pub fn message(status: OtaStatus) -> &'static str {
    match status {
        OtaStatus::Idle => "No update in progress",
        OtaStatus::Uploading => "Receiving firmware upload",
        OtaStatus::Downloading => "Downloading firmware from server",
        OtaStatus::Writing => "Writing firmware to flash",
        OtaStatus::Success => "Update complete, rebooting",
        OtaStatus::Failed => "Update failed",
    }
}

/// Pushed to the display layer on every state change.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub code: u8,
    pub status: OtaStatus,
    pub phrase: &'static str,
    pub progress: f32,
    pub total_size: u64,
    pub written_size: u64,
    pub error: Option<String>,
}

/// Receives state-change notifications. Implemented by the display task
/// and anything else that mirrors update progress. Notifications are
/// advisory; implementations must not block the update path.
pub trait ProgressSink: Send {
    fn on_update(&self, update: &ProgressUpdate);
}

/// Default sink: mirror state changes into the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_update(&self, update: &ProgressUpdate) {
        match &update.error {
            Some(err) => log::warn!("OTA {}: {}", update.phrase, err),
            None => log::info!(
                "OTA {}: {:.1}% ({}/{} bytes)",
                update.phrase,
                update.progress,
                update.written_size,
                update.total_size
            ),
        }
    }
}

/// Snapshot served to the HTTP status route. Cheap to clone out under the
/// session lock; producing it never does I/O.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub message: String,
    pub progress: f32,
    pub total_size: u64,
    pub written_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
