//! `parcompact` is a region-based parallel mark-sweep-compact collector
//! core for a generational managed heap. A fixed gang of worker threads
//! runs four strictly-barriered phases over a region-partitioned heap:
//!
//! * **Mark**: transitively mark everything reachable from the roots into
//!   a side bitmap, accumulating per-region live sizes.
//! * **Plan/Forward**: decide where each region's live objects land
//!   (splitting a region across destination spaces where needed), install
//!   forwarding pointers, and build the inter-region dependency graph.
//! * **Adjust pointers**: rewrite every surviving pointer to its
//!   referent's forwarded address.
//! * **Compact**: physically slide live objects to their destinations,
//!   blocking on per-region monitors until dependency regions have
//!   vacated.
//!
//! The embedding runtime plugs in through [`vm::Binding`]: an object model
//! (size, field scanning, header state) and a root-enumeration callback.
//! The collector itself is invoked with [`plan::Collector::collect`]
//! inside the embedder's stop-the-world pause.

#[macro_use]
extern crate log;

pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;

pub use crate::plan::{Collector, CollectorContext, CycleStats, GcError};
pub use crate::policy::heap::{Heap, HeapSpec};
pub use crate::policy::space::{SpaceKind, SpaceSpec};
pub use crate::util::options::Options;
pub use crate::util::{Address, ObjectReference};
