// Local upload path.
//
// The HTTP layer's multipart callback delivers four discrete events:
// transfer start, data chunks, transfer end, and abort. The callback never
// knows the image size up front, so the session starts with size unknown
// and the byte count seen here becomes the size at the end.

use std::sync::{Arc, Mutex};

use crate::system::tasks::TaskCoordinator;

use super::session::SharedSession;
use super::{OtaError, OtaKind, OtaStatus};

pub struct UploadHandler {
    session: SharedSession,
    coordinator: Arc<Mutex<TaskCoordinator>>,
    bytes_seen: u64,
}

impl UploadHandler {
    pub fn new(session: SharedSession, coordinator: Arc<Mutex<TaskCoordinator>>) -> Self {
        Self {
            session,
            coordinator,
            bytes_seen: 0,
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Upload transfer opened. Suspends background tasks and starts a
    /// session with the size still unknown.
    pub fn on_start(&mut self) -> Result<(), OtaError> {
        if self.session.lock().unwrap().status() != OtaStatus::Idle {
            return Err(OtaError::AlreadyInProgress);
        }
        self.bytes_seen = 0;
        self.coordinator.lock().unwrap().stop_all();
        let result = self.session.lock().unwrap().begin(0, OtaKind::Local);
        if result.is_err() {
            self.coordinator.lock().unwrap().restore_all();
        }
        result
    }

    /// One chunk of upload body arrived.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<(), OtaError> {
        let result = self.session.lock().unwrap().write_chunk(chunk);
        match result {
            Ok(()) => {
                self.bytes_seen += chunk.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.coordinator.lock().unwrap().restore_all();
                Err(err)
            }
        }
    }

    /// Transfer finished; the byte count seen by the callback becomes the
    /// image size. On success the caller answers the HTTP request and then
    /// reboots the device.
    pub fn on_end(&mut self) -> Result<(), OtaError> {
        let result = {
            let mut session = self.session.lock().unwrap();
            session
                .set_actual_size(self.bytes_seen)
                .and_then(|()| session.end())
        };
        if result.is_err() {
            self.coordinator.lock().unwrap().restore_all();
        }
        result
    }

    /// Client went away or cancelled. Safe to call in any state.
    pub fn on_abort(&mut self) {
        let aborted = self.session.lock().unwrap().abort();
        if aborted {
            self.coordinator.lock().unwrap().restore_all();
        }
    }
}
