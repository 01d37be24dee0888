// Platform abstraction for the firmware core.
//
// On the device these traits are implemented over the vendor SDK's OTA
// partition API and reset call; the in-memory double below backs the host
// test suites.

use anyhow::Result;

/// Write handle onto the firmware update partition. Exclusively owned by
/// the OTA session; nothing else may touch the partition while an update
/// is in flight.
pub trait FlashUpdate: Send {
    /// Free bytes available for a new image.
    fn free_space(&self) -> u64;

    /// Open an update. `size` is `None` when the image size is not yet
    /// known (streamed uploads report it only at the end of transfer).
    fn begin(&mut self, size: Option<u64>) -> Result<()>;

    /// Write one chunk, returning the number of bytes actually accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Finalize the written image into a bootable partition.
    fn commit(&mut self) -> Result<()>;

    /// Drop the handle and invalidate anything written so far.
    fn abort(&mut self);
}

/// Device-level control the update paths need after a committed image.
pub trait SystemControl: Send + Sync {
    /// Reboot into the new firmware. The device goes down shortly after
    /// this returns.
    fn restart(&self);
}

/// In-memory stand-ins used by the host test suites.
pub mod mock {
    use super::{FlashUpdate, SystemControl};
    use anyhow::{bail, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FlashState {
        Closed,
        Open,
        Committed,
        Aborted,
    }

    /// Flash partition double: records written bytes and can inject the
    /// failure modes the session has to survive.
    pub struct MockFlash {
        free: u64,
        written: Vec<u8>,
        state: FlashState,
        /// Accept no more than this many bytes in total; the write that
        /// crosses the limit is reported short.
        pub short_write_at: Option<usize>,
        pub fail_begin: bool,
        pub fail_commit: bool,
    }

    impl MockFlash {
        pub fn with_free_space(free: u64) -> Self {
            Self {
                free,
                written: Vec::new(),
                state: FlashState::Closed,
                short_write_at: None,
                fail_begin: false,
                fail_commit: false,
            }
        }

        pub fn written(&self) -> &[u8] {
            &self.written
        }

        pub fn is_committed(&self) -> bool {
            self.state == FlashState::Committed
        }

        pub fn is_aborted(&self) -> bool {
            self.state == FlashState::Aborted
        }
    }

    impl FlashUpdate for MockFlash {
        fn free_space(&self) -> u64 {
            self.free
        }

        fn begin(&mut self, _size: Option<u64>) -> Result<()> {
            if self.fail_begin {
                bail!("simulated begin failure");
            }
            if self.state == FlashState::Open {
                bail!("update already open");
            }
            self.written.clear();
            self.state = FlashState::Open;
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize> {
            if self.state != FlashState::Open {
                bail!("no update open");
            }
            if let Some(limit) = self.short_write_at {
                if self.written.len() + data.len() > limit {
                    let room = limit.saturating_sub(self.written.len());
                    self.written.extend_from_slice(&data[..room]);
                    return Ok(room);
                }
            }
            self.written.extend_from_slice(data);
            Ok(data.len())
        }

        fn commit(&mut self) -> Result<()> {
            if self.state != FlashState::Open {
                bail!("no update open");
            }
            if self.fail_commit {
                bail!("simulated commit failure");
            }
            self.state = FlashState::Committed;
            Ok(())
        }

        fn abort(&mut self) {
            if self.state == FlashState::Open {
                self.state = FlashState::Aborted;
            }
        }
    }

    /// Counts restart requests instead of rebooting anything.
    #[derive(Debug, Default)]
    pub struct RecordingSystem {
        restarts: AtomicUsize,
    }

    impl RecordingSystem {
        pub fn restart_count(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    impl SystemControl for RecordingSystem {
        fn restart(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
    }
}
