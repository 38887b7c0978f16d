//! A minimal embedding used by the test suites: a word-granular object
//! model with header-encoded mark/forwarding state, a root table, and
//! allocation helpers over the collector's spaces.
//!
//! Object layout (words):
//! ```text
//! word 0   GC header. Tag in the low two bits:
//!          00 unmarked (the rest of the word is optional side data, e.g.
//!             an identity hash, stored shifted left by two)
//!          01 marked, not moving
//!          11 marked, forwarded (the rest of the word is the destination)
//! word 1   shape: size in words (low 32 bits), reference count (next 31
//!          bits), reference-array flag (top bit)
//! word 2.. reference slots, then arbitrary payload words
//! ```

use std::cell::UnsafeCell;
use std::sync::Mutex;

use crate::plan::Collector;
use crate::policy::heap::HeapSpec;
use crate::policy::space::{SpaceKind, SpaceSpec};
use crate::util::conversions::words_to_bytes;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::{Binding, HeaderState, ObjectModel, SlotVisitor};

const TAG_MASK: usize = 0b11;
const TAG_UNMARKED: usize = 0b00;
const TAG_MARKED: usize = 0b01;
const TAG_FORWARDED: usize = 0b11;

const SHAPE_SIZE_MASK: usize = 0xffff_ffff;
const SHAPE_REFS_SHIFT: usize = 32;
const SHAPE_REFS_MASK: usize = 0x7fff_ffff;
const SHAPE_ARRAY_BIT: usize = 1 << 63;

/// Number of header words before the reference slots.
pub const HEADER_WORDS: usize = 2;

fn header(object: ObjectReference) -> usize {
    unsafe { object.to_address().load::<usize>() }
}

fn set_header(object: ObjectReference, word: usize) {
    unsafe { object.to_address().store::<usize>(word) }
}

fn shape(object: ObjectReference) -> usize {
    unsafe { (object.to_address() + crate::util::constants::BYTES_IN_WORD).load::<usize>() }
}

pub struct TestModel;

impl ObjectModel<TestBinding> for TestModel {
    fn size(object: ObjectReference) -> usize {
        shape(object) & SHAPE_SIZE_MASK
    }

    fn scan_object(object: ObjectReference, visitor: &mut impl SlotVisitor) {
        let refs = (shape(object) >> SHAPE_REFS_SHIFT) & SHAPE_REFS_MASK;
        for i in 0..refs {
            visitor.visit_slot(Self::array_slot(object, i));
        }
    }

    fn is_reference_array(object: ObjectReference) -> bool {
        shape(object) & SHAPE_ARRAY_BIT != 0
    }

    fn array_length(object: ObjectReference) -> usize {
        (shape(object) >> SHAPE_REFS_SHIFT) & SHAPE_REFS_MASK
    }

    fn array_slot(object: ObjectReference, index: usize) -> Address {
        object.to_address() + words_to_bytes(HEADER_WORDS + index)
    }

    fn header_state(object: ObjectReference) -> HeaderState {
        let word = header(object);
        match word & TAG_MASK {
            TAG_FORWARDED => {
                HeaderState::MarkedForwarded(unsafe { Address::from_usize(word & !TAG_MASK) })
            }
            TAG_MARKED => HeaderState::MarkedNotMoving,
            _ => HeaderState::Unmarked,
        }
    }

    fn init_mark(object: ObjectReference) -> Option<usize> {
        let old = header(object);
        debug_assert_eq!(old & TAG_MASK, TAG_UNMARKED, "{} marked twice", object);
        set_header(object, TAG_MARKED);
        // A non-zero unmarked header is displaced side data (the identity
        // hash) and must survive the cycle.
        (old != 0).then_some(old)
    }

    fn is_gc_marked(object: ObjectReference) -> bool {
        header(object) & TAG_MARKED != 0
    }

    fn forward_to(object: ObjectReference, to: Address) {
        debug_assert!(to.is_aligned_to(crate::util::constants::BYTES_IN_WORD));
        set_header(object, to.as_usize() | TAG_FORWARDED);
    }

    fn forwardee(object: ObjectReference) -> Option<Address> {
        let word = header(object);
        if word & TAG_MASK == TAG_FORWARDED {
            Some(unsafe { Address::from_usize(word & !TAG_MASK) })
        } else {
            None
        }
    }

    fn reset_header(object: ObjectReference) {
        set_header(object, 0);
    }

    fn restore_displaced(object: ObjectReference, word: usize) {
        set_header(object, word);
    }
}

struct RootCell(Box<UnsafeCell<ObjectReference>>);

// Root cells are raw slots: the collector reads and rewrites them through
// their addresses, synchronized by the phase barriers like any heap slot.
unsafe impl Send for RootCell {}
unsafe impl Sync for RootCell {}

/// Handle to one registered root slot.
#[derive(Debug, Copy, Clone)]
pub struct RootHandle(usize);

pub struct TestBinding {
    partitions: usize,
    roots: Mutex<Vec<RootCell>>,
}

impl TestBinding {
    pub fn new(partitions: usize) -> Self {
        TestBinding {
            partitions: partitions.max(1),
            roots: Mutex::new(Vec::new()),
        }
    }

    pub fn add_root(&self, object: ObjectReference) -> RootHandle {
        let mut roots = self.roots.lock().unwrap();
        roots.push(RootCell(Box::new(UnsafeCell::new(object))));
        RootHandle(roots.len() - 1)
    }

    pub fn root(&self, handle: RootHandle) -> ObjectReference {
        let roots = self.roots.lock().unwrap();
        unsafe { *roots[handle.0].0.get() }
    }

    pub fn set_root(&self, handle: RootHandle, object: ObjectReference) {
        let roots = self.roots.lock().unwrap();
        unsafe { *roots[handle.0].0.get() = object }
    }

    pub fn root_count(&self) -> usize {
        self.roots.lock().unwrap().len()
    }
}

impl Binding for TestBinding {
    type Model = TestModel;

    fn root_partitions(&self) -> usize {
        self.partitions
    }

    fn scan_roots(&self, partition: usize, visitor: &mut dyn SlotVisitor) {
        let roots = self.roots.lock().unwrap();
        for (i, cell) in roots.iter().enumerate() {
            if i % self.partitions == partition {
                visitor.visit_slot(Address::from_mut_ptr(cell.0.get()));
            }
        }
    }
}

/// A collector over the test binding plus allocation helpers.
pub struct TestHeap {
    pub collector: Collector<TestBinding>,
}

impl TestHeap {
    /// Spaces are given as `(name, kind, words)` in compaction order.
    pub fn new(spaces: &[(&'static str, SpaceKind, usize)], region_bytes: usize, workers: usize) -> Self {
        let spec = HeapSpec {
            spaces: spaces
                .iter()
                .map(|&(name, kind, words)| SpaceSpec { name, kind, words })
                .collect(),
        };
        let options = Options {
            workers,
            region_bytes,
            ..Options::default()
        };
        let collector =
            Collector::new(TestBinding::new(workers), spec, options).expect("failed to build heap");
        TestHeap { collector }
    }

    pub fn vm(&self) -> &TestBinding {
        self.collector.vm()
    }

    fn write_object(addr: Address, size_words: usize, refs: usize, array: bool) -> ObjectReference {
        assert!(size_words >= HEADER_WORDS + refs);
        assert!(size_words <= SHAPE_SIZE_MASK && refs <= SHAPE_REFS_MASK);
        crate::util::memory::zero(addr, words_to_bytes(size_words));
        let mut shape = size_words | (refs << SHAPE_REFS_SHIFT);
        if array {
            shape |= SHAPE_ARRAY_BIT;
        }
        unsafe {
            (addr + crate::util::constants::BYTES_IN_WORD).store::<usize>(shape);
        }
        ObjectReference::from_address(addr)
    }

    /// Allocate an object with `refs` reference slots in the given space,
    /// using the space's own footprint rule.
    pub fn alloc(&self, space: usize, size_words: usize, refs: usize) -> ObjectReference {
        let space = &self.collector.heap().spaces()[space];
        let adjusted = space.adjust_object_size(size_words);
        let addr = space.alloc(adjusted).expect("test space exhausted");
        crate::util::memory::zero(addr, words_to_bytes(adjusted));
        Self::write_object(addr, size_words, refs, false)
    }

    /// Like `alloc`, but returns None when the space is full.
    pub fn try_alloc(
        &self,
        space: usize,
        size_words: usize,
        refs: usize,
    ) -> Option<ObjectReference> {
        let space = &self.collector.heap().spaces()[space];
        let adjusted = space.adjust_object_size(size_words);
        let addr = space.alloc(adjusted)?;
        crate::util::memory::zero(addr, words_to_bytes(adjusted));
        Some(Self::write_object(addr, size_words, refs, false))
    }

    /// Allocate ignoring the free-list padding rule; used to provoke
    /// capacity exhaustion.
    pub fn alloc_unpadded(&self, space: usize, size_words: usize, refs: usize) -> ObjectReference {
        let space = &self.collector.heap().spaces()[space];
        let addr = space.alloc(size_words).expect("test space exhausted");
        Self::write_object(addr, size_words, refs, false)
    }

    /// Allocate a reference array of `len` elements.
    pub fn alloc_array(&self, space: usize, len: usize) -> ObjectReference {
        let space = &self.collector.heap().spaces()[space];
        let size = HEADER_WORDS + len;
        let adjusted = space.adjust_object_size(size);
        let addr = space.alloc(adjusted).expect("test space exhausted");
        crate::util::memory::zero(addr, words_to_bytes(adjusted));
        Self::write_object(addr, size, len, true)
    }

    pub fn set_ref(&self, object: ObjectReference, index: usize, target: ObjectReference) {
        unsafe { TestModel::array_slot(object, index).store(target) }
    }

    pub fn get_ref(&self, object: ObjectReference, index: usize) -> ObjectReference {
        unsafe { TestModel::array_slot(object, index).load() }
    }

    /// Payload words sit after the reference slots.
    pub fn set_payload(&self, object: ObjectReference, value: usize) {
        unsafe { self.payload_addr(object).store(value) }
    }

    pub fn get_payload(&self, object: ObjectReference) -> usize {
        unsafe { self.payload_addr(object).load() }
    }

    fn payload_addr(&self, object: ObjectReference) -> Address {
        let refs = (shape(object) >> SHAPE_REFS_SHIFT) & SHAPE_REFS_MASK;
        let size = shape(object) & SHAPE_SIZE_MASK;
        assert!(size > HEADER_WORDS + refs, "object has no payload word");
        object.to_address() + words_to_bytes(HEADER_WORDS + refs)
    }

    pub fn ref_count(&self, object: ObjectReference) -> usize {
        (shape(object) >> SHAPE_REFS_SHIFT) & SHAPE_REFS_MASK
    }

    pub fn size_words(&self, object: ObjectReference) -> usize {
        shape(object) & SHAPE_SIZE_MASK
    }

    /// Store identity-hash-style side data in the header word the mark
    /// overwrites.
    pub fn set_hash(&self, object: ObjectReference, hash: usize) {
        assert_eq!(header(object) & TAG_MASK, TAG_UNMARKED);
        set_header(object, hash << 2);
    }

    pub fn get_hash(&self, object: ObjectReference) -> usize {
        assert_eq!(header(object) & TAG_MASK, TAG_UNMARKED);
        header(object) >> 2
    }
}
