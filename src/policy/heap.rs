//! The heap: one contiguous reservation carved into spaces, each space
//! partitioned into an ordered array of regions.
//!
//! Spaces are declared in compaction order, so the global region order
//! (space order, then ascending address) coincides with ascending address
//! order across the whole reservation, and address→region lookup is a
//! single shift.

use std::io;
use std::ops::Range;

use crate::policy::region::{Region, RegionIndex};
use crate::policy::space::{Space, SpaceId, SpaceSpec};
use crate::util::conversions::words_to_bytes;
use crate::util::memory::Mmap;
use crate::util::Address;

#[derive(Debug, Clone)]
pub struct HeapSpec {
    /// Spaces in compaction order; for a generational layout this is the
    /// young spaces (eden, the two survivors) followed by the old
    /// generation.
    pub spaces: Vec<SpaceSpec>,
}

pub struct Heap {
    reservation: Mmap,
    spaces: Vec<Space>,
    regions: Vec<Region>,
    log_region_bytes: usize,
    /// Minimum free block size used for the free-list-adjusted live
    /// accounting during marking (the heap's free-list spaces share it).
    cfls_min_block_words: usize,
}

impl Heap {
    pub fn new(spec: &HeapSpec, region_bytes: usize) -> io::Result<Heap> {
        assert!(!spec.spaces.is_empty(), "heap needs at least one space");
        assert!(region_bytes.is_power_of_two());
        let region_words = region_bytes >> crate::util::constants::LOG_BYTES_IN_WORD;
        let mut total_words = 0;
        for space in &spec.spaces {
            assert!(
                space.words > 0 && space.words % region_words == 0,
                "space {} must be a whole number of regions",
                space.name
            );
            total_words += space.words;
        }

        let reservation = Mmap::new(words_to_bytes(total_words))?;
        let mut spaces = Vec::with_capacity(spec.spaces.len());
        let mut regions = Vec::with_capacity(total_words / region_words);
        let mut cursor = reservation.start();
        let mut cfls_min_block_words = 0;
        for (i, space_spec) in spec.spaces.iter().enumerate() {
            let id = SpaceId(i as u8);
            let first_region = regions.len();
            let space_start = cursor;
            let space_end = cursor + words_to_bytes(space_spec.words);
            while cursor < space_end {
                let index = regions.len();
                regions.push(Region::new(index, id, cursor, cursor + region_bytes));
                cursor = cursor + region_bytes;
            }
            let space = Space::new(id, space_spec, space_start, first_region..regions.len());
            cfls_min_block_words = cfls_min_block_words.max(space.minimum_free_block_words());
            spaces.push(space);
        }

        Ok(Heap {
            reservation,
            spaces,
            regions,
            log_region_bytes: region_bytes.trailing_zeros() as usize,
            cfls_min_block_words,
        })
    }

    pub fn bounds(&self) -> Range<Address> {
        let start = self.reservation.start();
        start..start + self.reservation.size()
    }

    pub fn total_words(&self) -> usize {
        self.reservation.size() >> crate::util::constants::LOG_BYTES_IN_WORD
    }

    pub fn contains(&self, addr: Address) -> bool {
        let bounds = self.bounds();
        addr >= bounds.start && addr < bounds.end
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn space(&self, id: SpaceId) -> &Space {
        &self.spaces[id.0 as usize]
    }

    /// The space after `id` in compaction order, if any.
    pub fn next_compaction_space(&self, id: SpaceId) -> Option<SpaceId> {
        let next = id.0 as usize + 1;
        if next < self.spaces.len() {
            Some(SpaceId(next as u8))
        } else {
            None
        }
    }

    pub fn space_for_addr(&self, addr: Address) -> Option<&Space> {
        self.spaces.iter().find(|s| s.contains(addr))
    }

    /// All regions in global compaction order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: RegionIndex) -> &Region {
        &self.regions[index]
    }

    /// O(1) address→region lookup. Precondition: the address lies within
    /// the heap.
    pub fn region_for_addr(&self, addr: Address) -> &Region {
        debug_assert!(self.contains(addr), "{} outside the heap", addr);
        let index = (addr - self.reservation.start()) >> self.log_region_bytes;
        &self.regions[index]
    }

    /// Indices of the regions whose address ranges intersect `range`.
    pub fn regions_overlapping(&self, range: &Range<Address>) -> Range<RegionIndex> {
        if range.is_empty() {
            return 0..0;
        }
        debug_assert!(self.contains(range.start));
        let start = (range.start - self.reservation.start()) >> self.log_region_bytes;
        let end = ((range.end - self.reservation.start()) + (1 << self.log_region_bytes) - 1)
            >> self.log_region_bytes;
        start..end.min(self.regions.len())
    }

    pub fn cfls_min_block_words(&self) -> usize {
        self.cfls_min_block_words
    }

    /// An object's footprint if it were compacted into a free-list space,
    /// used for the `cfls` live counters during marking.
    pub fn cfls_adjusted_size(&self, words: usize) -> usize {
        words.max(self.cfls_min_block_words)
    }
}
