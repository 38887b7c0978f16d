use crossbeam::deque::{Injector, Steal, Worker};
use enum_map::Enum;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::worker_monitor::WorkerMonitor;
use super::GCWork;
use crate::vm::Binding;

/// The collection cycle's phase stages, in execution order. A stage's
/// bucket only opens once every earlier bucket is drained and all workers
/// are parked, which gives the strict phase barriers of the four-phase
/// design.
#[derive(Debug, Enum, Copy, Clone, Eq, PartialEq)]
pub enum BucketStage {
    /// Clear the mark bitmap and reset per-region state.
    Prepare,
    /// Transitive closure over the heap: root scanning, object tracing and
    /// array-chunk tracing.
    Closure,
    /// The sequential compaction planner plus the parallel per-region
    /// forwarding walks.
    CalculateForwarding,
    /// Per-region dependency computation and dense-prefix
    /// reclassification.
    RegionDependencies,
    /// Rewrite every surviving pointer to its forwarded address.
    AdjustPointers,
    /// Physically evacuate regions, honoring inter-region dependencies.
    Compact,
    /// Reset headers the copy path never visited.
    Release,
    /// Apply new space tops, restore preserved header words, final
    /// accounting.
    Final,
}

impl BucketStage {
    pub fn iter() -> impl Iterator<Item = BucketStage> {
        (0..<BucketStage as Enum>::LENGTH).map(<BucketStage as Enum>::from_usize)
    }
}

/// A queue of work packets for one stage.
pub struct WorkBucket<VM: Binding> {
    active: AtomicBool,
    queue: Injector<Box<dyn GCWork<VM>>>,
    monitor: Arc<WorkerMonitor>,
}

impl<VM: Binding> WorkBucket<VM> {
    pub(crate) fn new(monitor: Arc<WorkerMonitor>) -> Self {
        WorkBucket {
            active: AtomicBool::new(false),
            queue: Injector::new(),
            monitor,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Enable the bucket. Only the cycle controller and the last-parked
    /// worker do this, and only when all earlier buckets are drained.
    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Disable the bucket for the next cycle.
    pub(crate) fn deactivate(&self) {
        debug_assert!(self.queue.is_empty(), "bucket not drained before close");
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.is_activated() && self.is_empty()
    }

    /// Add a work packet to this bucket.
    pub fn add<W: GCWork<VM>>(&self, work: W) {
        self.add_boxed(Box::new(work));
    }

    pub fn add_boxed(&self, work: Box<dyn GCWork<VM>>) {
        self.queue.push(work);
        // Nobody is waiting on a closed bucket.
        if self.is_activated() {
            self.monitor.notify_work_available();
        }
    }

    pub fn bulk_add(&self, work_vec: Vec<Box<dyn GCWork<VM>>>) {
        if work_vec.is_empty() {
            return;
        }
        for work in work_vec {
            self.queue.push(work);
        }
        if self.is_activated() {
            self.monitor.notify_work_available();
        }
    }

    /// Get a work packet from this bucket, batching extra packets into the
    /// polling worker's local deque.
    pub fn poll(&self, dest: &Worker<Box<dyn GCWork<VM>>>) -> Steal<Box<dyn GCWork<VM>>> {
        if !self.is_activated() || self.is_empty() {
            return Steal::Empty;
        }
        self.queue.steal_batch_and_pop(dest)
    }
}
