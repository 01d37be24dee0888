// End-to-end update flows over the public API, driven the way the HTTP
// glue drives them on the device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};

use netpanel::network::update_client::{FirmwareDownload, FirmwareEntry, UpdateServer, VersionInfo};
use netpanel::ota::{
    CheckOutcome, OtaError, OtaKind, OtaSession, ServerUpdater, SharedSession, UpdateOutcome,
    UploadHandler,
};
use netpanel::platform::mock::{MockFlash, RecordingSystem};
use netpanel::platform::SystemControl;
use netpanel::system::tasks::{TaskControl, TaskCoordinator};

struct CountingTask {
    stops: Arc<AtomicUsize>,
    starts: Arc<AtomicUsize>,
}

impl TaskControl for CountingTask {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn start(&mut self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    session: SharedSession,
    coordinator: Arc<Mutex<TaskCoordinator>>,
    stops: Arc<AtomicUsize>,
    starts: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let stops = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(AtomicUsize::new(0));
    let mut coord = TaskCoordinator::with_settle_delay(Duration::ZERO);
    for name in ["time_sync", "weather", "monitor"] {
        coord.register(
            name,
            Box::new(CountingTask {
                stops: stops.clone(),
                starts: starts.clone(),
            }),
        );
    }
    Harness {
        session: OtaSession::shared(Box::new(MockFlash::with_free_space(16 * 1024 * 1024))),
        coordinator: Arc::new(Mutex::new(coord)),
        stops,
        starts,
    }
}

struct StaticServer {
    version: String,
    image: Vec<u8>,
}

impl UpdateServer for StaticServer {
    fn fetch_version_info(&self, _base_url: &str) -> Result<VersionInfo, OtaError> {
        Ok(VersionInfo {
            version: self.version.clone(),
            url: None,
            size: Some(self.image.len() as u64),
            checksum: Some(hex::encode(Sha256::digest(&self.image))),
        })
    }

    fn fetch_firmware_list(&self, _base_url: &str) -> Result<Vec<FirmwareEntry>, OtaError> {
        Ok(vec![FirmwareEntry {
            file: "panel.bin".into(),
            version: Some(self.version.clone()),
            size: Some(self.image.len() as u64),
        }])
    }

    fn fetch_firmware(&self, _base_url: &str, _file: &str) -> Result<FirmwareDownload, OtaError> {
        Ok(FirmwareDownload {
            content_length: self.image.len() as u64,
            body: Box::new(std::io::Cursor::new(self.image.clone())),
        })
    }
}

#[test]
fn local_upload_with_size_known_only_at_end() {
    let h = harness();
    let mut upload = UploadHandler::new(h.session.clone(), h.coordinator.clone());

    upload.on_start().unwrap();
    let chunk = vec![0x42u8; 512 * 1024];
    for _ in 0..4 {
        upload.on_data(&chunk).unwrap();
    }
    assert_eq!(upload.bytes_seen(), 2_097_152);
    upload.on_end().unwrap();

    let session = h.session.lock().unwrap();
    assert_eq!(session.status().as_str(), "success");
    assert_eq!(session.total_size(), 2_097_152);
    assert_eq!(session.progress(), 100.0);
    assert_eq!(h.stops.load(Ordering::SeqCst), 3);
    assert_eq!(h.starts.load(Ordering::SeqCst), 0);
}

#[test]
fn upload_rejected_when_image_does_not_fit() {
    let stops = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(AtomicUsize::new(0));
    let mut coord = TaskCoordinator::with_settle_delay(Duration::ZERO);
    coord.register(
        "weather",
        Box::new(CountingTask {
            stops: stops.clone(),
            starts: starts.clone(),
        }),
    );
    // free space covers the image but not the safety margin
    let session = OtaSession::shared(Box::new(MockFlash::with_free_space(1_100_000)));
    let mut upload = UploadHandler::new(session.clone(), Arc::new(Mutex::new(coord)));

    upload.on_start().unwrap();
    let chunk = vec![0u8; 1_048_576];
    upload.on_data(&chunk).unwrap();
    let err = upload.on_end().unwrap_err();
    assert!(matches!(err, OtaError::InsufficientSpace { .. }));
    // failure path restores the suspended tasks
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[test]
fn server_update_applies_and_reboots() {
    let h = harness();
    let image = vec![0x11u8; 6000];
    let system = Arc::new(RecordingSystem::default());
    let updater = Arc::new(
        ServerUpdater::new(
            h.session.clone(),
            h.coordinator.clone(),
            Arc::new(StaticServer {
                version: "1.2.0".into(),
                image: image.clone(),
            }),
            system.clone(),
        )
        .with_current_version("1.0.0"),
    );

    let handle = updater
        .spawn_update("http://updates.local/panel".into(), "panel.bin".into())
        .unwrap();
    let outcome = handle.join().unwrap().unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied);
    assert_eq!(system.restart_count(), 1);

    let session = h.session.lock().unwrap();
    assert_eq!(session.status().as_str(), "success");
    assert_eq!(session.written_size(), image.len() as u64);
    assert_eq!(session.digest(), Some(hex::encode(Sha256::digest(&image)).as_str()));
    assert_eq!(h.stops.load(Ordering::SeqCst), 3);
    assert_eq!(h.starts.load(Ordering::SeqCst), 0);
}

#[test]
fn older_server_firmware_is_reported_and_nothing_moves() {
    let h = harness();
    let system: Arc<dyn SystemControl> = Arc::new(RecordingSystem::default());
    let updater = ServerUpdater::new(
        h.session.clone(),
        h.coordinator.clone(),
        Arc::new(StaticServer {
            version: "0.9.0".into(),
            image: vec![0u8; 128],
        }),
        system,
    )
    .with_current_version("1.0.0");

    let outcome = updater
        .run_update("http://updates.local/panel", "panel.bin")
        .unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Skipped(CheckOutcome::ServerOlder {
            server: "0.9.0".into()
        })
    );
    assert_eq!(h.session.lock().unwrap().status().as_str(), "idle");
    assert_eq!(h.stops.load(Ordering::SeqCst), 0);
    assert_eq!(h.starts.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_attempt_can_be_reset_and_retried() {
    let h = harness();
    let mut upload = UploadHandler::new(h.session.clone(), h.coordinator.clone());

    upload.on_start().unwrap();
    upload.on_data(&[0u8; 1024]).unwrap();
    upload.on_abort();
    assert_eq!(h.session.lock().unwrap().status().as_str(), "failed");

    // a new attempt is only accepted once the session is back to Idle
    let err = h
        .session
        .lock()
        .unwrap()
        .begin(0, OtaKind::Local)
        .unwrap_err();
    assert_eq!(err, OtaError::AlreadyInProgress);

    h.session.lock().unwrap().reset().unwrap();
    upload.on_start().unwrap();
    upload.on_data(&[1u8; 2048]).unwrap();
    upload.on_end().unwrap();
    assert_eq!(h.session.lock().unwrap().status().as_str(), "success");
}

#[test]
fn status_snapshot_tracks_the_whole_flow() {
    let h = harness();
    let mut upload = UploadHandler::new(h.session.clone(), h.coordinator.clone());

    let idle = h.session.lock().unwrap().snapshot();
    assert_eq!(idle.status, "idle");
    assert_eq!(idle.progress, 0.0);
    assert!(idle.ota_type.is_none());

    upload.on_start().unwrap();
    upload.on_data(&[0u8; 4096]).unwrap();
    let mid = h.session.lock().unwrap().snapshot();
    assert_eq!(mid.status, "writing");
    assert_eq!(mid.ota_type, Some("local"));
    assert!(mid.progress > 0.0 && mid.progress < 100.0);

    upload.on_end().unwrap();
    let done = h.session.lock().unwrap().snapshot();
    assert_eq!(done.status, "success");
    assert_eq!(done.progress, 100.0);
    assert!(done.error.is_none());
}
