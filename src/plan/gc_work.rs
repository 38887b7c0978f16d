//! The work packets making up one collection cycle, stage by stage.

use crate::plan::tracing::{adjust_slot, MarkTrace};
use crate::plan::{forwarding, CollectorContext};
use crate::policy::region::RegionIndex;
use crate::policy::space::SpaceId;
use crate::scheduler::{BucketStage, GCWork, GCWorker};
use crate::util::{Address, ObjectReference};
use crate::vm::{Binding, ObjectModel};
use std::sync::atomic::Ordering;

/// Prepare: clear the space's slice of the mark bitmap and reset its
/// regions' per-cycle state.
pub(crate) struct PrepareSpace {
    space: SpaceId,
}

impl PrepareSpace {
    pub fn new(space: SpaceId) -> Self {
        PrepareSpace { space }
    }
}

impl<VM: Binding> GCWork<VM> for PrepareSpace {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        let space = ctx.heap.space(self.space);
        trace!("prepare space {}", space.name());
        ctx.mark_bitmap.clear_range(space.bottom(), space.end());
        for index in space.regions() {
            ctx.heap.region(index).reset();
        }
    }
}

/// Closure: seed reachability from one partition of the root set.
pub(crate) struct ScanRoots {
    partition: usize,
}

impl ScanRoots {
    pub fn new(partition: usize) -> Self {
        ScanRoots { partition }
    }
}

impl<VM: Binding> GCWork<VM> for ScanRoots {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        let mut trace = MarkTrace::new(ctx, worker);
        let mut visitor = |slot: Address| trace.trace_slot(slot);
        ctx.vm.scan_roots(self.partition, &mut visitor);
        trace.complete_trace();
    }
}

/// Closure: follow the contents of a batch of already-marked objects.
pub(crate) struct ProcessMarkedObjects {
    objects: Vec<ObjectReference>,
}

impl ProcessMarkedObjects {
    pub fn new(objects: Vec<ObjectReference>) -> Self {
        ProcessMarkedObjects { objects }
    }
}

impl<VM: Binding> GCWork<VM> for ProcessMarkedObjects {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        let objects = std::mem::take(&mut self.objects);
        let mut trace = MarkTrace::with_buffer(ctx, worker, objects);
        trace.complete_trace();
    }
}

/// Closure: trace one chunk of a large reference array.
pub(crate) struct MarkArrayChunk {
    array: ObjectReference,
    start: usize,
    end: usize,
}

impl MarkArrayChunk {
    pub fn new(array: ObjectReference, start: usize, end: usize) -> Self {
        MarkArrayChunk { array, start, end }
    }
}

impl<VM: Binding> GCWork<VM> for MarkArrayChunk {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        let mut trace = MarkTrace::new(ctx, worker);
        for index in self.start..self.end {
            trace.trace_slot(VM::Model::array_slot(self.array, index));
        }
        trace.complete_trace();
    }
}

/// CalculateForwarding: the sequential planner. Fans out one
/// `ForwardRegion` packet per live region into the same stage.
pub(crate) struct PlanCompaction;

impl<VM: Binding> GCWork<VM> for PlanCompaction {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        match forwarding::plan_compaction(ctx) {
            Ok(live_regions) => {
                debug!("planned {} live regions", live_regions.len());
                let packets = live_regions
                    .into_iter()
                    .map(|index| Box::new(ForwardRegion::new(index)) as Box<dyn GCWork<VM>>)
                    .collect();
                worker.scheduler().work_buckets[BucketStage::CalculateForwarding]
                    .bulk_add(packets);
            }
            Err(error) => ctx.poison(error),
        }
    }
}

/// CalculateForwarding: install forwarding pointers for one region.
pub(crate) struct ForwardRegion {
    region: RegionIndex,
}

impl ForwardRegion {
    pub fn new(region: RegionIndex) -> Self {
        ForwardRegion { region }
    }
}

impl<VM: Binding> GCWork<VM> for ForwardRegion {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        forwarding::forward_region(ctx, ctx.heap.region(self.region));
    }
}

/// RegionDependencies: compute one region's dependency edges, and
/// reclassify regions with nothing to copy (the dense prefix and empty
/// regions) as already evacuated so compaction never waits on them.
pub(crate) struct RegionDeps {
    region: RegionIndex,
}

impl RegionDeps {
    pub fn new(region: RegionIndex) -> Self {
        RegionDeps { region }
    }
}

impl<VM: Binding> GCWork<VM> for RegionDeps {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        let region = ctx.heap.region(self.region);
        if region.live_words() == 0 {
            region.reclassify_evacuated();
            ctx.cycle
                .counters
                .reclassified_regions
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        if region.plan().first_moved.is_none() {
            // Uniformly in-place: nothing to copy, nothing to wait for.
            // The marked headers still need cleaning once the adjust phase
            // has finished reading them.
            region.reclassify_evacuated();
            ctx.cycle
                .counters
                .reclassified_regions
                .fetch_add(1, Ordering::Relaxed);
            worker.scheduler().work_buckets[BucketStage::Release]
                .add(ResetRegionHeaders::new(self.region));
            return;
        }
        let deps = forwarding::region_dependencies(ctx, region);
        region.plan().dependencies = deps;
    }
}

/// AdjustPointers: rewrite one partition of the root set.
pub(crate) struct AdjustRoots {
    partition: usize,
}

impl AdjustRoots {
    pub fn new(partition: usize) -> Self {
        AdjustRoots { partition }
    }
}

impl<VM: Binding> GCWork<VM> for AdjustRoots {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        let mut visitor = |slot: Address| adjust_slot::<VM>(slot);
        ctx.vm.scan_roots(self.partition, &mut visitor);
    }
}

/// AdjustPointers: rewrite every reference field of the marked objects
/// starting in one region.
pub(crate) struct AdjustRegion {
    region: RegionIndex,
}

impl AdjustRegion {
    pub fn new(region: RegionIndex) -> Self {
        AdjustRegion { region }
    }
}

impl<VM: Binding> GCWork<VM> for AdjustRegion {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        let region = ctx.heap.region(self.region);
        if region.live_words() == 0 {
            return;
        }
        ctx.mark_bitmap.iterate(region.start(), region.end(), |addr| {
            let object = ObjectReference::from_address(addr);
            debug_assert!(VM::Model::is_gc_marked(object));
            let mut visitor = |slot: Address| adjust_slot::<VM>(slot);
            VM::Model::scan_object(object, &mut visitor);
            true
        });
    }
}

/// AdjustPointers: relocate the object addresses in one preserved-marks
/// stack.
pub(crate) struct AdjustPreservedMarks {
    ordinal: usize,
}

impl AdjustPreservedMarks {
    pub fn new(ordinal: usize) -> Self {
        AdjustPreservedMarks { ordinal }
    }
}

impl<VM: Binding> GCWork<VM> for AdjustPreservedMarks {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        ctx.preserved_marks.adjust::<VM>(self.ordinal);
    }
}

/// Compact: one claim loop per worker.
pub(crate) struct EvacuateRegions;

impl<VM: Binding> GCWork<VM> for EvacuateRegions {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        forwarding::evacuate_regions(ctx);
    }
}

/// Release: clean the headers of a reclassified region's objects, which
/// the copy path never visited.
pub(crate) struct ResetRegionHeaders {
    region: RegionIndex,
}

impl ResetRegionHeaders {
    pub fn new(region: RegionIndex) -> Self {
        ResetRegionHeaders { region }
    }
}

impl<VM: Binding> GCWork<VM> for ResetRegionHeaders {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        let region = ctx.heap.region(self.region);
        ctx.mark_bitmap.iterate(region.start(), region.end(), |addr| {
            VM::Model::reset_header(ObjectReference::from_address(addr));
            true
        });
    }
}

/// Final: write one stack of preserved header words back.
pub(crate) struct RestorePreservedMarks {
    ordinal: usize,
}

impl RestorePreservedMarks {
    pub fn new(ordinal: usize) -> Self {
        RestorePreservedMarks { ordinal }
    }
}

impl<VM: Binding> GCWork<VM> for RestorePreservedMarks {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        ctx.preserved_marks.restore::<VM>(self.ordinal);
    }
}

/// Final: apply the planner's cursors as the spaces' new allocation tops
/// and report each space's observed live range.
pub(crate) struct EndOfCycle;

impl<VM: Binding> GCWork<VM> for EndOfCycle {
    fn do_work(&mut self, _worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>) {
        if ctx.is_aborted() {
            return;
        }
        let new_tops = ctx.cycle.new_tops.lock().unwrap().clone();
        for (space, top) in ctx.heap.spaces().iter().zip(new_tops) {
            let mut begin = None;
            let mut end = None;
            let mut first_moved = None;
            for index in space.regions() {
                let plan = ctx.heap.region(index).plan();
                if begin.is_none() {
                    begin = plan.beginning_of_live;
                }
                if plan.end_of_live.is_some() {
                    end = plan.end_of_live;
                }
                if first_moved.is_none() {
                    first_moved = plan.first_moved;
                }
            }
            space.set_live_range_for_compaction(begin, end, first_moved);
            debug!(
                "space {}: new top {} ({} words used)",
                space.name(),
                top,
                (top - space.bottom()) >> crate::util::constants::LOG_BYTES_IN_WORD
            );
            space.set_top(top);
        }
    }
}
