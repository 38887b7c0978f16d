use crossbeam::deque::Steal;
use enum_map::{enum_map, EnumMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::work_bucket::{BucketStage, WorkBucket};
use super::worker::{GCWorker, WorkerGroup};
use super::worker_monitor::{ParkResult, WorkerMonitor};
use super::GCWork;
use crate::plan::CollectorContext;
use crate::vm::Binding;

/// Schedules work packets over the worker gang.
///
/// One bucket per phase stage; a bucket only opens once every earlier
/// bucket is drained and all workers are parked, so stages execute under
/// strict barriers. Within an open stage, packets flow through the bucket
/// queue, the workers' local deques and CAS-based stealing.
pub struct GCWorkScheduler<VM: Binding> {
    pub work_buckets: EnumMap<BucketStage, WorkBucket<VM>>,
    pub(crate) worker_group: Arc<WorkerGroup<VM>>,
    pub(crate) worker_monitor: Arc<WorkerMonitor>,
}

impl<VM: Binding> GCWorkScheduler<VM> {
    pub fn new(num_workers: usize) -> Arc<Self> {
        assert!(num_workers > 0);
        let worker_monitor = Arc::new(WorkerMonitor::new(num_workers));
        let worker_group = WorkerGroup::new(num_workers);
        let work_buckets = enum_map! { _ => WorkBucket::new(worker_monitor.clone()) };
        Arc::new(GCWorkScheduler {
            work_buckets,
            worker_group,
            worker_monitor,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.worker_group.worker_count()
    }

    pub(crate) fn spawn_workers(
        self: &Arc<Self>,
        ctx: &Arc<CollectorContext<VM>>,
    ) -> Vec<JoinHandle<()>> {
        self.worker_group.spawn(self, ctx)
    }

    /// Get a schedulable work packet without retry: own deque first, then
    /// the open buckets, then steal from the other workers.
    fn poll_schedulable_work_once(&self, worker: &GCWorker<VM>) -> Steal<Box<dyn GCWork<VM>>> {
        if let Some(work) = worker.local_work_buffer.pop() {
            return Steal::Success(work);
        }
        let mut should_retry = false;
        for (_, bucket) in self.work_buckets.iter() {
            match bucket.poll(&worker.local_work_buffer) {
                Steal::Success(work) => return Steal::Success(work),
                Steal::Retry => should_retry = true,
                Steal::Empty => {}
            }
        }
        for (ordinal, shared) in self.worker_group.shared.iter().enumerate() {
            if ordinal == worker.ordinal {
                continue;
            }
            match shared.stealer.steal() {
                Steal::Success(work) => return Steal::Success(work),
                Steal::Retry => should_retry = true,
                Steal::Empty => {}
            }
        }
        if should_retry {
            Steal::Retry
        } else {
            Steal::Empty
        }
    }

    fn poll_schedulable_work(&self, worker: &GCWorker<VM>) -> Option<Box<dyn GCWork<VM>>> {
        loop {
            match self.poll_schedulable_work_once(worker) {
                Steal::Success(work) => return Some(work),
                Steal::Retry => {
                    std::thread::yield_now();
                    continue;
                }
                Steal::Empty => return None,
            }
        }
    }

    /// Called by workers to get work, parking when none is available.
    /// Returns None when the collector is shutting down.
    pub(crate) fn poll(&self, worker: &GCWorker<VM>) -> Option<Box<dyn GCWork<VM>>> {
        loop {
            let epoch = self.worker_monitor.epoch();
            if let Some(work) = self.poll_schedulable_work(worker) {
                return Some(work);
            }
            match self.worker_monitor.park(epoch, || self.update_buckets()) {
                ParkResult::Continue => continue,
                ParkResult::Exit => return None,
            }
        }
    }

    /// The last-parked worker's duty: open the next stage(s). Returns true
    /// if an opened bucket holds packets; false means every stage is open
    /// and drained, i.e. the cycle is finished. Runs with the monitor lock
    /// held and all workers parked.
    fn update_buckets(&self) -> bool {
        for stage in BucketStage::iter() {
            let bucket = &self.work_buckets[stage];
            if bucket.is_activated() {
                // All workers are parked, so an open bucket with leftover
                // packets means lost wakeups, not in-flight work.
                if !bucket.is_empty() {
                    return true;
                }
                continue;
            }
            bucket.activate();
            trace!("opened stage {:?}", stage);
            if !bucket.is_empty() {
                return true;
            }
            // An empty stage completes immediately; keep opening.
        }
        false
    }

    /// Controller side: open the first stage and wake the gang.
    pub(crate) fn request_cycle(&self) {
        self.work_buckets[BucketStage::Prepare].activate();
        self.worker_monitor.request_cycle();
    }

    pub(crate) fn wait_cycle_finished(&self) {
        self.worker_monitor.wait_cycle_finished();
    }

    /// Close all buckets for the next cycle. Only valid while the gang is
    /// quiescent.
    pub(crate) fn reset_after_cycle(&self) {
        for (_, bucket) in self.work_buckets.iter() {
            bucket.deactivate();
        }
    }

    pub(crate) fn request_exit(&self) {
        self.worker_monitor.request_exit();
    }
}
