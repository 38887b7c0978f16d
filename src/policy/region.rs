//! Regions: the unit of parallel work assignment over a space.
//!
//! A region carries the live-size counters accumulated during marking, the
//! destination and dependency bookkeeping produced by the plan phase, and
//! the evacuation state machine driven by the compact phase.

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;
use std::ops::Range;
use std::sync::atomic::AtomicUsize;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::policy::space::SpaceId;
use crate::util::conversions::words_to_bytes;
use crate::util::Address;

/// Global region index, in compaction order (space order, then ascending
/// address). Dependency edges always point to strictly smaller indices.
pub type RegionIndex = usize;

/// The evacuation state machine. Transitions are monotonic and happen
/// exactly once per cycle: `NotEvac → BeingEvac → HasBeenEvac`.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, NoUninit)]
pub enum RegionState {
    NotEvac = 0,
    BeingEvac = 1,
    HasBeenEvac = 2,
}

/// "This contiguous live sub-range of a source region compacts into this
/// contiguous range of a destination space." A region owns several of
/// these when it straddles destination spaces.
#[derive(Debug, Clone)]
pub struct RegionDest {
    /// Source window; live objects *starting* in this window belong to
    /// this destination.
    pub src: Range<Address>,
    pub dest_space: SpaceId,
    pub dest_start: Address,
    /// Size of the destination range in words (kind-adjusted for free-list
    /// destination spaces).
    pub dest_words: usize,
}

impl RegionDest {
    pub fn dest_range(&self) -> Range<Address> {
        self.dest_start..self.dest_start + words_to_bytes(self.dest_words)
    }
}

/// Per-cycle plan data, written by the planner and the region's forwarding
/// packet, read by the dependency and compact phases. Guarded by the
/// region's plan lock; cross-phase visibility comes from the phase
/// barriers.
#[derive(Debug, Default)]
pub struct RegionPlan {
    pub destinations: Vec<RegionDest>,
    pub dependencies: Vec<RegionIndex>,
    /// Address of the first live object starting in this region.
    pub beginning_of_live: Option<Address>,
    /// End address of the last live object starting in this region (may
    /// extend past the region end for a spanning object).
    pub end_of_live: Option<Address>,
    /// Address of the first live object that moves this cycle; None means
    /// the region is part of the dense prefix.
    pub first_moved: Option<Address>,
}

impl RegionPlan {
    pub fn live_range(&self) -> Option<Range<Address>> {
        match (self.beginning_of_live, self.end_of_live) {
            (Some(b), Some(e)) => Some(b..e),
            _ => None,
        }
    }
}

pub struct Region {
    index: RegionIndex,
    space: SpaceId,
    start: Address,
    end: Address,
    /// Live words of objects starting in this region, counted exactly once
    /// per object by the marking race winner.
    live_words: AtomicUsize,
    /// The same live size with each object's size adjusted for free-list
    /// allocation padding, so the planner can size a free-list destination
    /// without rescanning the region.
    cfls_live_words: AtomicUsize,
    plan: Mutex<RegionPlan>,
    state: Atomic<RegionState>,
    /// Monitor for dependency blocking: waiters block here until the
    /// region reaches `HasBeenEvac`.
    monitor: Mutex<()>,
    evacuated: Condvar,
    /// Order in which the region completed evacuation this cycle.
    evac_sequence: AtomicUsize,
}

impl Region {
    pub fn new(index: RegionIndex, space: SpaceId, start: Address, end: Address) -> Self {
        Region {
            index,
            space,
            start,
            end,
            live_words: AtomicUsize::new(0),
            cfls_live_words: AtomicUsize::new(0),
            plan: Mutex::new(RegionPlan::default()),
            state: Atomic::new(RegionState::NotEvac),
            monitor: Mutex::new(()),
            evacuated: Condvar::new(),
            evac_sequence: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> RegionIndex {
        self.index
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn range(&self) -> Range<Address> {
        self.start..self.end
    }

    pub fn words(&self) -> usize {
        (self.end - self.start) >> crate::util::constants::LOG_BYTES_IN_WORD
    }

    /// Concurrent-safe live accounting, called exactly once per marked
    /// object. An object spanning the region boundary is attributed
    /// entirely to the region its header starts in, so the total may
    /// exceed the region's own word count.
    pub fn add_live(&self, words: usize, cfls_words: usize) {
        self.live_words.fetch_add(words, Ordering::SeqCst);
        self.cfls_live_words.fetch_add(cfls_words, Ordering::SeqCst);
    }

    pub fn live_words(&self) -> usize {
        self.live_words.load(Ordering::SeqCst)
    }

    pub fn cfls_live_words(&self) -> usize {
        self.cfls_live_words.load(Ordering::SeqCst)
    }

    pub fn plan(&self) -> MutexGuard<'_, RegionPlan> {
        self.plan.lock().unwrap()
    }

    /// Reset the per-cycle mutable state. Called while the world is
    /// quiescent at the start of a cycle.
    pub fn reset(&self) {
        self.live_words.store(0, Ordering::SeqCst);
        self.cfls_live_words.store(0, Ordering::SeqCst);
        *self.plan.lock().unwrap() = RegionPlan::default();
        self.state.store(RegionState::NotEvac, Ordering::SeqCst);
        self.evac_sequence.store(0, Ordering::SeqCst);
    }

    pub fn state(&self) -> RegionState {
        self.state.load(Ordering::SeqCst)
    }

    /// The lock-free claim: `NotEvac → BeingEvac`. Returns true iff this
    /// caller now owns the region's evacuation.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                RegionState::NotEvac,
                RegionState::BeingEvac,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// `BeingEvac → HasBeenEvac`, under the monitor, waking all dependents.
    pub fn mark_evacuated(&self, sequence: usize) {
        let _guard = self.monitor.lock().unwrap();
        debug_assert_eq!(self.state(), RegionState::BeingEvac);
        self.evac_sequence.store(sequence, Ordering::SeqCst);
        self.state.store(RegionState::HasBeenEvac, Ordering::SeqCst);
        self.evacuated.notify_all();
    }

    /// Dense-prefix and empty regions skip the copy path entirely; the
    /// state machine still transitions through `BeingEvac` exactly once.
    pub fn reclassify_evacuated(&self) {
        let claimed = self.try_claim();
        debug_assert!(claimed, "region {} reclassified twice", self.index);
        let _guard = self.monitor.lock().unwrap();
        self.state.store(RegionState::HasBeenEvac, Ordering::SeqCst);
        self.evacuated.notify_all();
    }

    /// Block until this region has finished evacuating. Condition wait on
    /// the region monitor, never a spin.
    pub fn wait_until_evacuated(&self) {
        let mut guard = self.monitor.lock().unwrap();
        while self.state.load(Ordering::SeqCst) != RegionState::HasBeenEvac {
            guard = self.evacuated.wait(guard).unwrap();
        }
    }

    pub fn evacuation_sequence(&self) -> usize {
        self.evac_sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        let start = unsafe { Address::from_usize(0x10000) };
        Region::new(0, SpaceId(0), start, start + 0x1000usize)
    }

    #[test]
    fn claim_is_exclusive_and_single_shot() {
        let r = region();
        assert_eq!(r.state(), RegionState::NotEvac);
        assert!(r.try_claim());
        assert!(!r.try_claim());
        r.mark_evacuated(1);
        assert_eq!(r.state(), RegionState::HasBeenEvac);
        // Re-running compaction on an evacuated region is rejected.
        assert!(!r.try_claim());
    }

    #[test]
    fn wait_returns_once_evacuated() {
        let r = std::sync::Arc::new(region());
        assert!(r.try_claim());
        let r2 = r.clone();
        let waiter = std::thread::spawn(move || r2.wait_until_evacuated());
        r.mark_evacuated(1);
        waiter.join().unwrap();
    }

    #[test]
    fn live_accounting_accumulates() {
        let r = region();
        r.add_live(8, 8);
        r.add_live(2, 4);
        assert_eq!(r.live_words(), 10);
        assert_eq!(r.cfls_live_words(), 12);
        r.reset();
        assert_eq!(r.live_words(), 0);
        assert_eq!(r.state(), RegionState::NotEvac);
    }
}
