//! The mark-sweep-compact plan: the collector context shared by every
//! worker, the cycle controller, and the four phase drivers scheduled as
//! work packets.

pub(crate) mod forwarding;
mod gc_work;
pub(crate) mod tracing;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::policy::heap::{Heap, HeapSpec};
use crate::scheduler::{BucketStage, GCWorkScheduler};
use crate::util::mark_bitmap::MarkBitmap;
use crate::util::options::Options;
use crate::util::preserved_marks::PreservedMarksSet;
use crate::util::Address;
use crate::vm::Binding;

/// Failures that abort a collection cycle. There is no transient class:
/// every operation is either total over valid heap state or a fatal
/// invariant breach (asserted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// Live data cannot fit even after splitting across every remaining
    /// compaction space. The half-planned heap is not safe to resume; the
    /// embedder must treat the pause as failed with an out-of-memory
    /// condition.
    OutOfMemory { unplaced_words: usize },
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GcError::OutOfMemory { unplaced_words } => write!(
                f,
                "live data exceeds total compaction capacity ({} words unplaced)",
                unplaced_words
            ),
        }
    }
}

impl std::error::Error for GcError {}

#[derive(Default)]
pub(crate) struct CycleCounters {
    pub live_objects: AtomicUsize,
    pub live_words: AtomicUsize,
    pub moved_words: AtomicUsize,
    /// Source of per-region evacuation sequence numbers; doubles as the
    /// evacuated-region count.
    pub evac_sequence: AtomicUsize,
    pub reclassified_regions: AtomicUsize,
}

pub(crate) struct CycleState {
    aborted: AtomicBool,
    error: Mutex<Option<GcError>>,
    /// Final compaction cursor per space, recorded by the planner and
    /// applied to the spaces at the end of the cycle.
    pub new_tops: Mutex<Vec<Address>>,
    pub counters: CycleCounters,
}

/// Everything the phase drivers and workers share. Passed by reference to
/// every work packet; the collector has no global state.
pub struct CollectorContext<VM: Binding> {
    pub vm: VM,
    pub heap: Heap,
    pub mark_bitmap: MarkBitmap,
    pub preserved_marks: PreservedMarksSet,
    pub options: Options,
    pub(crate) cycle: CycleState,
}

impl<VM: Binding> CollectorContext<VM> {
    /// Abort the cycle: remaining packets become no-ops and `collect`
    /// surfaces the error.
    pub(crate) fn poison(&self, error: GcError) {
        warn!("collection cycle aborted: {}", error);
        *self.cycle.error.lock().unwrap() = Some(error);
        self.cycle.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.cycle.aborted.load(Ordering::SeqCst)
    }

    fn reset_cycle_state(&self) {
        self.cycle.aborted.store(false, Ordering::SeqCst);
        *self.cycle.error.lock().unwrap() = None;
        let bottoms = self.heap.spaces().iter().map(|s| s.bottom()).collect();
        *self.cycle.new_tops.lock().unwrap() = bottoms;
        self.cycle.counters.live_objects.store(0, Ordering::SeqCst);
        self.cycle.counters.live_words.store(0, Ordering::SeqCst);
        self.cycle.counters.moved_words.store(0, Ordering::SeqCst);
        self.cycle.counters.evac_sequence.store(0, Ordering::SeqCst);
        self.cycle
            .counters
            .reclassified_regions
            .store(0, Ordering::SeqCst);
        self.preserved_marks.reset();
    }
}

/// Summary of one completed collection cycle.
#[derive(Debug, Clone)]
pub struct CycleStats {
    pub live_objects: usize,
    pub live_words: usize,
    pub moved_words: usize,
    /// Regions that went through the copy path.
    pub evacuated_regions: usize,
    /// Regions reclassified as already evacuated (dense prefix and empty
    /// regions).
    pub reclassified_regions: usize,
    pub duration: Duration,
}

/// A parallel mark-sweep-compact collector over a region-partitioned
/// generational heap.
///
/// The worker gang is spawned once at construction and parks between
/// cycles. `collect` is invoked by the embedder inside its own
/// stop-the-world pause; the calling thread blocks until the cycle
/// completes.
pub struct Collector<VM: Binding> {
    ctx: Arc<CollectorContext<VM>>,
    scheduler: Arc<GCWorkScheduler<VM>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl<VM: Binding> Collector<VM> {
    pub fn new(vm: VM, heap_spec: HeapSpec, options: Options) -> std::io::Result<Self> {
        options.validate();
        let heap = Heap::new(&heap_spec, options.region_bytes)?;
        let bounds = heap.bounds();
        let total_words = heap.total_words();
        let mark_bitmap = if options.dedicated_bitmap {
            MarkBitmap::new_mapped(bounds.start, total_words)?
        } else {
            MarkBitmap::new(bounds.start, total_words)
        };
        let preserved_marks = PreservedMarksSet::new(options.workers);
        let space_count = heap.spaces().len();
        let ctx = Arc::new(CollectorContext {
            vm,
            heap,
            mark_bitmap,
            preserved_marks,
            options: options.clone(),
            cycle: CycleState {
                aborted: AtomicBool::new(false),
                error: Mutex::new(None),
                new_tops: Mutex::new(vec![Address::ZERO; space_count]),
                counters: CycleCounters::default(),
            },
        });
        let scheduler = GCWorkScheduler::new(options.workers);
        let worker_handles = scheduler.spawn_workers(&ctx);
        info!(
            "collector ready: {} spaces, {} regions of {} KiB, {} workers",
            space_count,
            ctx.heap.regions().len(),
            options.region_bytes / 1024,
            options.workers
        );
        Ok(Collector {
            ctx,
            scheduler,
            worker_handles,
        })
    }

    pub fn context(&self) -> &CollectorContext<VM> {
        &self.ctx
    }

    pub fn heap(&self) -> &Heap {
        &self.ctx.heap
    }

    pub fn vm(&self) -> &VM {
        &self.ctx.vm
    }

    /// Run one full collection cycle: mark, plan/forward, adjust pointers,
    /// compact. Blocks until the gang finishes.
    pub fn collect(&self) -> Result<CycleStats, GcError> {
        let start = Instant::now();
        debug!("collection cycle starting");
        self.ctx.reset_cycle_state();
        self.schedule_cycle();
        self.scheduler.request_cycle();
        self.scheduler.wait_cycle_finished();
        self.scheduler.reset_after_cycle();
        if let Some(error) = self.ctx.cycle.error.lock().unwrap().take() {
            return Err(error);
        }
        let counters = &self.ctx.cycle.counters;
        let stats = CycleStats {
            live_objects: counters.live_objects.load(Ordering::SeqCst),
            live_words: counters.live_words.load(Ordering::SeqCst),
            moved_words: counters.moved_words.load(Ordering::SeqCst),
            evacuated_regions: counters.evac_sequence.load(Ordering::SeqCst),
            reclassified_regions: counters.reclassified_regions.load(Ordering::SeqCst),
            duration: start.elapsed(),
        };
        info!(
            "cycle done: {} live objects ({} words), {} words moved, {} regions evacuated, {} reclassified, took {} ms",
            stats.live_objects,
            stats.live_words,
            stats.moved_words,
            stats.evacuated_regions,
            stats.reclassified_regions,
            stats.duration.as_millis()
        );
        Ok(stats)
    }

    /// Fill the stage buckets for one cycle. Buckets are closed at this
    /// point; the stages open one by one as the gang drains them.
    fn schedule_cycle(&self) {
        use self::gc_work::*;
        let buckets = &self.scheduler.work_buckets;
        for space in self.ctx.heap.spaces() {
            buckets[BucketStage::Prepare].add(PrepareSpace::new(space.id()));
        }
        for partition in 0..self.ctx.vm.root_partitions() {
            buckets[BucketStage::Closure].add(ScanRoots::new(partition));
        }
        buckets[BucketStage::CalculateForwarding].add(PlanCompaction);
        for region in self.ctx.heap.regions() {
            buckets[BucketStage::RegionDependencies].add(RegionDeps::new(region.index()));
        }
        for partition in 0..self.ctx.vm.root_partitions() {
            buckets[BucketStage::AdjustPointers].add(AdjustRoots::new(partition));
        }
        for region in self.ctx.heap.regions() {
            buckets[BucketStage::AdjustPointers].add(AdjustRegion::new(region.index()));
        }
        for ordinal in 0..self.ctx.preserved_marks.stacks() {
            buckets[BucketStage::AdjustPointers].add(AdjustPreservedMarks::new(ordinal));
        }
        for _ in 0..self.scheduler.num_workers() {
            buckets[BucketStage::Compact].add(EvacuateRegions);
        }
        for ordinal in 0..self.ctx.preserved_marks.stacks() {
            buckets[BucketStage::Final].add(RestorePreservedMarks::new(ordinal));
        }
        buckets[BucketStage::Final].add(EndOfCycle);
    }
}

impl<VM: Binding> Drop for Collector<VM> {
    fn drop(&mut self) {
        self.scheduler.request_exit();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}
