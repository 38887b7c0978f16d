//! The work-packet scheduler: buckets per phase stage, a fixed worker
//! gang, crossbeam work-stealing and the parked-worker termination
//! barrier.

#[allow(clippy::module_inception)]
mod scheduler;
mod work;
mod work_bucket;
pub mod worker;
mod worker_monitor;

pub use scheduler::GCWorkScheduler;
pub use work::GCWork;
pub use work_bucket::{BucketStage, WorkBucket};
pub use worker::GCWorker;
