//! The boundary between the collector core and the embedding runtime.
//!
//! The core consumes the runtime through two narrow protocols: root
//! enumeration (visit every slot capable of holding a live reference,
//! exactly once per phase that needs it) and the per-object protocol of
//! [`ObjectModel`]. Object headers are only ever interpreted through
//! [`HeaderState`]; the core never manipulates raw tag bits.

use crate::util::{Address, ObjectReference};

/// The state encoded in an object's header during a collection cycle.
///
/// A marked object's header doubles as forwarding storage: a tagged null
/// means "marked, not moving this cycle", and a tagged address is the
/// object's post-compaction location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unmarked,
    MarkedNotMoving,
    MarkedForwarded(Address),
}

/// Visits reference slots (addresses of fields holding object references).
pub trait SlotVisitor {
    fn visit_slot(&mut self, slot: Address);
}

impl<F: FnMut(Address)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address) {
        self(slot)
    }
}

/// Read the object reference held in a slot. Null references load as
/// [`ObjectReference::NULL`].
pub fn load_slot(slot: Address) -> ObjectReference {
    unsafe { slot.load::<ObjectReference>() }
}

pub fn store_slot(slot: Address, object: ObjectReference) {
    unsafe { slot.store::<ObjectReference>(object) }
}

/// The per-object protocol the collector consumes.
///
/// All sizes are in words. `object` always refers to the object's *current*
/// address; during compaction the model is asked about headers at their
/// pre-copy locations only.
pub trait ObjectModel<VM: Binding>: 'static + Send + Sync {
    /// Object size in words, including the header.
    fn size(object: ObjectReference) -> usize;

    /// Visit every reference slot of the object.
    fn scan_object(object: ObjectReference, visitor: &mut impl SlotVisitor);

    /// True if the object is an array of references, eligible for chunked
    /// tracing.
    fn is_reference_array(object: ObjectReference) -> bool;

    /// Number of elements of a reference array.
    fn array_length(object: ObjectReference) -> usize;

    /// Address of the `index`th element slot of a reference array.
    fn array_slot(object: ObjectReference, index: usize) -> Address;

    /// Decode the header.
    fn header_state(object: ObjectReference) -> HeaderState;

    /// Install the mark in the header. Called exactly once per object per
    /// cycle, by the worker that won the bitmap race. If the overwritten
    /// header word carried side information that must survive the cycle,
    /// it is returned for the preserved-marks table.
    fn init_mark(object: ObjectReference) -> Option<usize>;

    fn is_gc_marked(object: ObjectReference) -> bool;

    /// Record the object's post-compaction address in its header.
    fn forward_to(object: ObjectReference, to: Address);

    /// The address recorded by `forward_to`, or None if the object is not
    /// moving (the tagged-null encoding).
    fn forwardee(object: ObjectReference) -> Option<Address>;

    /// Reinstall a clean (unmarked, unforwarded) header. Called at the
    /// object's final address once it no longer needs mark or forwarding
    /// state.
    fn reset_header(object: ObjectReference);

    /// Write a displaced header word back (preserved-marks restore).
    fn restore_displaced(object: ObjectReference, word: usize);
}

/// The embedding runtime.
///
/// Root scanning is instance-based: the binding decides how its root set is
/// partitioned, and the collector schedules one packet per partition for
/// the phases that need roots (marking seeds reachability, pointer
/// adjustment rewrites the same slots).
pub trait Binding: 'static + Send + Sync + Sized {
    type Model: ObjectModel<Self>;

    /// Number of disjoint root partitions. Each partition is scanned by
    /// exactly one packet per phase.
    fn root_partitions(&self) -> usize;

    /// Visit every root slot in `partition` exactly once.
    fn scan_roots(&self, partition: usize, visitor: &mut dyn SlotVisitor);
}
