//! The plan/forward phase: destination assignment (sequential), per-region
//! forwarding walks (parallel), dependency computation and the evacuation
//! copy loop.

use crate::plan::{CollectorContext, GcError};
use crate::policy::region::{Region, RegionDest, RegionIndex};
use crate::policy::space::Space;
use crate::util::constants::LOG_BYTES_IN_WORD;
use crate::util::conversions::words_to_bytes;
use crate::util::{Address, ObjectReference};
use crate::vm::{Binding, ObjectModel};
use std::sync::atomic::Ordering;

pub(crate) struct SplitPoint {
    /// Address of the first object excluded from the destination.
    pub split_addr: Address,
    /// Words consumed in the destination space (kind-adjusted).
    pub dest_units: usize,
    /// Raw live words consumed.
    pub raw_words: usize,
    /// Free-list-adjusted live words consumed.
    pub cfls_words: usize,
}

/// Walk a region's live objects in address order, accumulating the running
/// compacted size, and stop at the first object whose inclusion would
/// either overflow the destination's remaining capacity or leave a tail
/// fragment smaller than the destination's minimum free block size. An
/// object that exactly fills the space is always permitted.
pub(crate) fn find_split_point<VM: Binding>(
    ctx: &CollectorContext<VM>,
    region: &Region,
    from: Address,
    capacity_words: usize,
    dest: &Space,
) -> SplitPoint {
    let mut split = SplitPoint {
        split_addr: region.end(),
        dest_units: 0,
        raw_words: 0,
        cfls_words: 0,
    };
    let min_free_block = dest.minimum_free_block_words();
    ctx.mark_bitmap.iterate(from, region.end(), |addr| {
        let object = ObjectReference::from_address(addr);
        let words = VM::Model::size(object);
        let unit = dest.adjust_object_size(words);
        let after = split.dest_units + unit;
        if after > capacity_words {
            split.split_addr = addr;
            return false;
        }
        if dest.is_free_list_space() && after != capacity_words && capacity_words - after < min_free_block
        {
            // Sliding past this object would strand an unusable sliver at
            // the end of the space.
            split.split_addr = addr;
            return false;
        }
        split.dest_units = after;
        split.raw_words += words;
        split.cfls_words += ctx.heap.cfls_adjusted_size(words);
        true
    });
    split
}

/// The sequential planning pass: one `compact_top` cursor per destination
/// space, regions visited in global compaction order, each assigned one or
/// more destination ranges. Returns the regions that need a forwarding
/// walk. Cursor advancement is inherently sequential; everything
/// downstream of it runs in parallel.
pub(crate) fn plan_compaction<VM: Binding>(
    ctx: &CollectorContext<VM>,
) -> Result<Vec<RegionIndex>, GcError> {
    let heap = &ctx.heap;
    let mut cursors: Vec<Address> = heap.spaces().iter().map(|s| s.bottom()).collect();
    let mut dest_id = heap.spaces()[0].id();
    let mut live_regions = Vec::new();

    for region in heap.regions() {
        let live = region.live_words();
        if live == 0 {
            continue;
        }
        live_regions.push(region.index());
        let mut rem_raw = live;
        let mut rem_cfls = region.cfls_live_words();
        let mut src_cursor = region.start();
        let mut plan = region.plan();
        loop {
            let dest = heap.space(dest_id);
            let cursor = &mut cursors[dest_id.0 as usize];
            let capacity = (dest.end() - *cursor) >> LOG_BYTES_IN_WORD;
            let need = if dest.is_free_list_space() {
                rem_cfls
            } else {
                rem_raw
            };
            if need <= capacity {
                plan.destinations.push(RegionDest {
                    src: src_cursor..region.end(),
                    dest_space: dest_id,
                    dest_start: *cursor,
                    dest_words: need,
                });
                *cursor += words_to_bytes(need);
                break;
            }
            let split = find_split_point(ctx, region, src_cursor, capacity, dest);
            if split.dest_units > 0 {
                plan.destinations.push(RegionDest {
                    src: src_cursor..split.split_addr,
                    dest_space: dest_id,
                    dest_start: *cursor,
                    dest_words: split.dest_units,
                });
                *cursor += words_to_bytes(split.dest_units);
                rem_raw -= split.raw_words;
                rem_cfls -= split.cfls_words;
                src_cursor = split.split_addr;
            }
            match heap.next_compaction_space(dest_id) {
                Some(next) => dest_id = next,
                None => {
                    return Err(GcError::OutOfMemory {
                        unplaced_words: rem_raw,
                    })
                }
            }
        }
    }

    *ctx.cycle.new_tops.lock().unwrap() = cursors;
    Ok(live_regions)
}

/// The parallel part of the plan phase: walk one region's live objects in
/// each destination range and install forwarding pointers for everything
/// that moves, recording the live range and the first moved object.
pub(crate) fn forward_region<VM: Binding>(ctx: &CollectorContext<VM>, region: &Region) {
    let mut plan = region.plan();
    let mut begin = None;
    let mut end = None;
    let mut first_moved = None;
    for dest in &plan.destinations {
        let dest_space = ctx.heap.space(dest.dest_space);
        let mut to = dest.dest_start;
        ctx.mark_bitmap.iterate(dest.src.start, dest.src.end, |addr| {
            let object = ObjectReference::from_address(addr);
            let words = VM::Model::size(object);
            if begin.is_none() {
                begin = Some(addr);
            }
            end = Some(addr + words_to_bytes(words));
            if to != addr {
                VM::Model::forward_to(object, to);
                if first_moved.is_none() {
                    first_moved = Some(addr);
                }
            }
            to += words_to_bytes(dest_space.adjust_object_size(words));
            true
        });
        debug_assert_eq!(
            to,
            dest.dest_range().end,
            "forwarding walk of region {} disagrees with the planner",
            region.index()
        );
    }
    plan.beginning_of_live = begin;
    plan.end_of_live = end;
    plan.first_moved = first_moved;
}

/// Dependency computation for one region: for every destination range,
/// any region of the destination space whose live range overlaps it must
/// finish vacating before this region may copy into it. Edges always point
/// to strictly earlier regions in the claim order, which keeps the graph
/// acyclic and the monitor waits deadlock-free.
pub(crate) fn region_dependencies<VM: Binding>(
    ctx: &CollectorContext<VM>,
    region: &Region,
) -> Vec<RegionIndex> {
    let destinations = region.plan().destinations.clone();
    let mut deps = Vec::new();
    let mut consider = |index: usize, dest_range: &std::ops::Range<Address>| {
        if index == region.index() {
            return;
        }
        // A region with an empty live range has nothing to vacate.
        if let Some(live) = ctx.heap.region(index).plan().live_range() {
            if !Address::range_intersection(&live, dest_range).is_empty() {
                deps.push(index);
            }
        }
    };
    for dest in &destinations {
        let dest_range = dest.dest_range();
        let overlapped = ctx.heap.regions_overlapping(&dest_range);
        for index in overlapped.clone() {
            debug_assert_eq!(ctx.heap.region(index).space(), dest.dest_space);
            consider(index, &dest_range);
        }
        // An object spanning region boundaries is attributed to the region
        // its header starts in, so a live range can reach into the
        // destination window from the left. Walk left until a region's
        // live data provably ends before the window.
        let space_first = ctx.heap.space(dest.dest_space).regions().start;
        let mut index = overlapped.start;
        while index > space_first {
            index -= 1;
            consider(index, &dest_range);
            // Objects cannot overlap, so nothing further left can span
            // past this region's own live data into the window; only
            // fully-covered (liveless) regions are walked through.
            if ctx.heap.region(index).plan().live_range().is_some() {
                break;
            }
        }
    }
    deps.sort_unstable();
    deps.dedup();
    debug_assert!(
        deps.iter().all(|&d| d < region.index()),
        "dependency edge points up the claim order from region {}",
        region.index()
    );
    deps
}

/// The evacuation claim loop run by each compact-phase packet: claim the
/// first `NotEvac` region in the global order with a lock-free CAS, block
/// on each dependency's monitor until it has been evacuated, copy, mark
/// evacuated, repeat until no region is left to claim.
pub(crate) fn evacuate_regions<VM: Binding>(ctx: &CollectorContext<VM>) {
    use crate::policy::region::RegionState;
    loop {
        let mut claimed = None;
        for region in ctx.heap.regions() {
            if region.state() == RegionState::NotEvac && region.try_claim() {
                claimed = Some(region);
                break;
            }
        }
        let region = match claimed {
            Some(region) => region,
            None => return,
        };
        evacuate_one(ctx, region);
    }
}

fn evacuate_one<VM: Binding>(ctx: &CollectorContext<VM>, region: &Region) {
    let (dependencies, destinations) = {
        let plan = region.plan();
        (plan.dependencies.clone(), plan.destinations.clone())
    };
    for dep in dependencies {
        ctx.heap.region(dep).wait_until_evacuated();
    }
    let mut moved_words = 0;
    for dest in &destinations {
        let dest_space = ctx.heap.space(dest.dest_space);
        let mut to = dest.dest_start;
        ctx.mark_bitmap.iterate(dest.src.start, dest.src.end, |addr| {
            let object = ObjectReference::from_address(addr);
            let words = VM::Model::size(object);
            match VM::Model::forwardee(object) {
                None => {
                    // Not moving; clean the header in place.
                    debug_assert_eq!(to, addr);
                    VM::Model::reset_header(object);
                }
                Some(new) => {
                    debug_assert_eq!(new, to);
                    trace!("copy {} ~> {} ({} words)", addr, new, words);
                    // Source and destination may overlap when an object
                    // slides within its own region.
                    unsafe {
                        std::ptr::copy::<usize>(addr.to_ptr(), new.to_mut_ptr(), words);
                    }
                    VM::Model::reset_header(ObjectReference::from_address(new));
                    moved_words += words;
                }
            }
            to += words_to_bytes(dest_space.adjust_object_size(words));
            true
        });
    }
    ctx.cycle
        .counters
        .moved_words
        .fetch_add(moved_words, Ordering::Relaxed);
    let sequence = ctx.cycle.counters.evac_sequence.fetch_add(1, Ordering::SeqCst) + 1;
    region.mark_evacuated(sequence);
}
