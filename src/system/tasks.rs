// Background task coordination around update windows.
//
// Flash writes are long blocking operations, so the update paths suspend
// the periodic subsystems (time sync, weather polling, monitoring loop)
// first to free RAM and CPU. The display task keeps rendering progress and
// the web server keeps answering status polls; neither is ever registered
// here.

use std::thread;
use std::time::Duration;

use anyhow::Result;

/// Settle time after issuing all stop requests, letting in-flight work on
/// the stopped tasks drain before flash writes start.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Start/stop handle onto one background subsystem, implemented by the
/// subsystem's owner outside this crate.
pub trait TaskControl: Send {
    fn stop(&mut self);

    /// Restart after a failed update. Subsystems without a restart path
    /// return an error, which restore_all() logs and skips.
    fn start(&mut self) -> Result<()>;
}

struct ManagedTask {
    name: &'static str,
    control: Box<dyn TaskControl>,
    was_running: bool,
}

/// Stops a fixed set of named background subsystems before an update and
/// restores them if the update fails. A successful update reboots the
/// device, so there is no restore path on success.
pub struct TaskCoordinator {
    tasks: Vec<ManagedTask>,
    settle_delay: Duration,
}

impl TaskCoordinator {
    pub fn new() -> Self {
        Self::with_settle_delay(DEFAULT_SETTLE_DELAY)
    }

    pub fn with_settle_delay(settle_delay: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            settle_delay,
        }
    }

    /// Register one stoppable subsystem. Registration order is stop order.
    pub fn register(&mut self, name: &'static str, control: Box<dyn TaskControl>) {
        self.tasks.push(ManagedTask {
            name,
            control,
            was_running: false,
        });
    }

    /// Stop every registered subsystem and mark it for restoration. Run
    /// state is not queried first: every stoppable task is assumed running
    /// and recorded as such. The record is overwritten on each call.
    pub fn stop_all(&mut self) -> bool {
        for task in &mut self.tasks {
            log::info!("suspending {} for update", task.name);
            task.control.stop();
            task.was_running = true;
        }
        if !self.tasks.is_empty() {
            thread::sleep(self.settle_delay);
        }
        true
    }

    /// Restart the subsystems recorded by the last stop_all(). Individual
    /// restart failures are logged, not escalated.
    pub fn restore_all(&mut self) {
        for task in &mut self.tasks {
            if !task.was_running {
                continue;
            }
            task.was_running = false;
            match task.control.start() {
                Ok(()) => log::info!("restored {}", task.name),
                Err(err) => log::warn!(
                    "{} could not be restarted ({err}); manual restart required",
                    task.name
                ),
            }
        }
    }
}

impl Default for TaskCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeTask {
        stops: Arc<AtomicUsize>,
        starts: Arc<AtomicUsize>,
        restartable: bool,
    }

    impl TaskControl for FakeTask {
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn start(&mut self) -> Result<()> {
            if !self.restartable {
                bail!("no restart path");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinator() -> (TaskCoordinator, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(AtomicUsize::new(0));
        let mut coord = TaskCoordinator::with_settle_delay(Duration::ZERO);
        for (name, restartable) in [("time_sync", true), ("weather", true), ("monitor", false)] {
            coord.register(
                name,
                Box::new(FakeTask {
                    stops: stops.clone(),
                    starts: starts.clone(),
                    restartable,
                }),
            );
        }
        (coord, stops, starts)
    }

    #[test]
    fn stop_all_stops_every_task() {
        let (mut coord, stops, _) = coordinator();
        assert!(coord.stop_all());
        assert_eq!(stops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn restore_all_restarts_recorded_tasks() {
        let (mut coord, _, starts) = coordinator();
        coord.stop_all();
        coord.restore_all();
        // monitor has no restart path and is only logged
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn restore_without_stop_is_a_no_op() {
        let (mut coord, _, starts) = coordinator();
        coord.restore_all();
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn record_is_consumed_by_restore() {
        let (mut coord, _, starts) = coordinator();
        coord.stop_all();
        coord.restore_all();
        coord.restore_all();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn record_is_rebuilt_on_each_stop() {
        let (mut coord, stops, starts) = coordinator();
        coord.stop_all();
        coord.restore_all();
        coord.stop_all();
        coord.restore_all();
        assert_eq!(stops.load(Ordering::SeqCst), 6);
        assert_eq!(starts.load(Ordering::SeqCst), 4);
    }
}
