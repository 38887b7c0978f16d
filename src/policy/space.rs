//! Spaces: the contiguous sub-heaps regions are carved from.
//!
//! Each space is either a bump-allocated (contiguous) space or a free-list
//! space whose allocator pads small objects up to a minimum block size. The
//! collector consumes spaces through the protocol here; allocation policy
//! beyond the padding rule stays with the embedder.

use atomic::{Atomic, Ordering};
use std::ops::Range;
use std::sync::Mutex;

use crate::policy::region::RegionIndex;
use crate::util::conversions::words_to_bytes;
use crate::util::Address;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SpaceId(pub u8);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpaceKind {
    /// Contiguous bump allocation; objects occupy exactly their size.
    Bump,
    /// Free-list allocation; blocks smaller than the minimum are never
    /// created, so object footprints are padded up to it.
    FreeList { min_free_block_words: usize },
}

/// Static description of one space, in compaction order (oldest generation
/// last). Sizes are in words and must be a whole number of regions.
#[derive(Debug, Clone)]
pub struct SpaceSpec {
    pub name: &'static str,
    pub kind: SpaceKind,
    pub words: usize,
}

/// The live extent observed by the most recent compaction plan, reported
/// through `set_live_range_for_compaction`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveRange {
    pub begin: Option<Address>,
    pub end: Option<Address>,
    pub first_moved: Option<Address>,
}

pub struct Space {
    id: SpaceId,
    name: &'static str,
    kind: SpaceKind,
    start: Address,
    end: Address,
    /// Bump cursor: the embedder allocates below it, the collector resets
    /// it after compaction.
    top: Atomic<Address>,
    /// Global indices of this space's regions.
    regions: Range<RegionIndex>,
    live_range: Mutex<LiveRange>,
}

impl Space {
    pub(crate) fn new(
        id: SpaceId,
        spec: &SpaceSpec,
        start: Address,
        regions: Range<RegionIndex>,
    ) -> Self {
        let end = start + words_to_bytes(spec.words);
        Space {
            id,
            name: spec.name,
            kind: spec.kind,
            start,
            end,
            top: Atomic::new(start),
            regions,
            live_range: Mutex::new(LiveRange::default()),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn bottom(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn words(&self) -> usize {
        (self.end - self.start) >> crate::util::constants::LOG_BYTES_IN_WORD
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn regions(&self) -> Range<RegionIndex> {
        self.regions.clone()
    }

    pub fn is_free_list_space(&self) -> bool {
        matches!(self.kind, SpaceKind::FreeList { .. })
    }

    pub fn minimum_free_block_words(&self) -> usize {
        match self.kind {
            SpaceKind::Bump => 0,
            SpaceKind::FreeList {
                min_free_block_words,
            } => min_free_block_words,
        }
    }

    /// The footprint an object of `words` occupies in this space,
    /// accounting for free-list padding.
    pub fn adjust_object_size(&self, words: usize) -> usize {
        match self.kind {
            SpaceKind::Bump => words,
            SpaceKind::FreeList {
                min_free_block_words,
            } => words.max(min_free_block_words),
        }
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::SeqCst)
    }

    pub(crate) fn set_top(&self, top: Address) {
        debug_assert!(top >= self.start && top <= self.end);
        self.top.store(top, Ordering::SeqCst);
    }

    /// Bump-allocate `words` (already kind-adjusted by the caller).
    /// Returns None when the space is full.
    pub fn alloc(&self, words: usize) -> Option<Address> {
        let bytes = words_to_bytes(words);
        loop {
            let top = self.top.load(Ordering::SeqCst);
            if top + bytes > self.end {
                return None;
            }
            if self
                .top
                .compare_exchange(top, top + bytes, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(top);
            }
        }
    }

    pub fn set_live_range_for_compaction(
        &self,
        begin: Option<Address>,
        end: Option<Address>,
        first_moved: Option<Address>,
    ) {
        *self.live_range.lock().unwrap() = LiveRange {
            begin,
            end,
            first_moved,
        };
    }

    pub fn live_range_for_compaction(&self) -> LiveRange {
        *self.live_range.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(kind: SpaceKind) -> Space {
        let spec = SpaceSpec {
            name: "test",
            kind,
            words: 1024,
        };
        Space::new(SpaceId(0), &spec, unsafe { Address::from_usize(0x8000) }, 0..1)
    }

    #[test]
    fn bump_alloc_until_full() {
        let s = space(SpaceKind::Bump);
        let a = s.alloc(512).unwrap();
        assert_eq!(a, s.bottom());
        let b = s.alloc(512).unwrap();
        assert_eq!(b - a, 512 * 8);
        assert!(s.alloc(1).is_none());
    }

    #[test]
    fn free_list_padding() {
        let s = space(SpaceKind::FreeList {
            min_free_block_words: 4,
        });
        assert_eq!(s.adjust_object_size(2), 4);
        assert_eq!(s.adjust_object_size(4), 4);
        assert_eq!(s.adjust_object_size(9), 9);
        assert_eq!(s.minimum_free_block_words(), 4);
    }

    #[test]
    fn bump_space_has_no_padding() {
        let s = space(SpaceKind::Bump);
        assert_eq!(s.adjust_object_size(2), 2);
        assert_eq!(s.minimum_free_block_words(), 0);
    }
}
