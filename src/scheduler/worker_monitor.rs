//! Synchronization between the worker gang and the controlling thread.
//!
//! Workers park here when they find no schedulable work. The last worker
//! to park runs the bucket-opening duty; if nothing opens, the cycle is
//! finished and the controller is woken. This is the two-phase termination
//! barrier: a stage only ends when every queue is empty and all workers
//! are simultaneously parked.

use std::sync::{Condvar, Mutex};

struct MonitorSync {
    /// Bumped whenever new work may have become available. Workers re-poll
    /// instead of sleeping if the epoch moved under them.
    epoch: usize,
    parked: usize,
    cycle_active: bool,
    cycle_done: bool,
    exit: bool,
}

pub(crate) enum ParkResult {
    /// Re-poll the queues.
    Continue,
    /// The collector is shutting down.
    Exit,
}

pub(crate) struct WorkerMonitor {
    workers: usize,
    sync: Mutex<MonitorSync>,
    work_available: Condvar,
    cycle_finished: Condvar,
}

impl WorkerMonitor {
    pub fn new(workers: usize) -> Self {
        WorkerMonitor {
            workers,
            sync: Mutex::new(MonitorSync {
                epoch: 0,
                parked: 0,
                cycle_active: false,
                cycle_done: false,
                exit: false,
            }),
            work_available: Condvar::new(),
            cycle_finished: Condvar::new(),
        }
    }

    /// Snapshot the epoch before probing the queues; `park` only sleeps if
    /// it is unchanged, so a notification between probe and park is never
    /// lost.
    pub fn epoch(&self) -> usize {
        self.sync.lock().unwrap().epoch
    }

    pub fn notify_work_available(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.epoch += 1;
        self.work_available.notify_all();
    }

    /// Park the calling worker. `on_all_parked` runs when this is the last
    /// worker to park during an active cycle; it returns whether it made
    /// more work available (by opening buckets). It is called with the
    /// monitor lock held and must not call back into the monitor.
    pub fn park(&self, observed_epoch: usize, on_all_parked: impl FnOnce() -> bool) -> ParkResult {
        let mut sync = self.sync.lock().unwrap();
        if sync.exit {
            return ParkResult::Exit;
        }
        if sync.epoch != observed_epoch {
            return ParkResult::Continue;
        }
        sync.parked += 1;
        if sync.parked == self.workers && sync.cycle_active {
            if on_all_parked() {
                sync.epoch += 1;
                sync.parked -= 1;
                self.work_available.notify_all();
                return ParkResult::Continue;
            }
            // Every bucket is open and drained: the cycle is complete.
            sync.cycle_active = false;
            sync.cycle_done = true;
            self.cycle_finished.notify_all();
        }
        while sync.epoch == observed_epoch && !sync.exit {
            sync = self.work_available.wait(sync).unwrap();
        }
        sync.parked -= 1;
        if sync.exit {
            ParkResult::Exit
        } else {
            ParkResult::Continue
        }
    }

    /// Controller side: start a cycle and wake the gang.
    pub fn request_cycle(&self) {
        let mut sync = self.sync.lock().unwrap();
        debug_assert!(!sync.cycle_active, "collection cycle already running");
        sync.cycle_active = true;
        sync.cycle_done = false;
        sync.epoch += 1;
        self.work_available.notify_all();
    }

    /// Controller side: block until the gang finishes the cycle.
    pub fn wait_cycle_finished(&self) {
        let mut sync = self.sync.lock().unwrap();
        while !sync.cycle_done {
            sync = self.cycle_finished.wait(sync).unwrap();
        }
    }

    /// Ask all workers to exit their run loops.
    pub fn request_exit(&self) {
        let mut sync = self.sync.lock().unwrap();
        debug_assert!(!sync.cycle_active, "cannot shut down mid-cycle");
        sync.exit = true;
        sync.epoch += 1;
        self.work_available.notify_all();
    }
}
