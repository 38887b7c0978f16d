use crate::plan::CollectorContext;
use crate::scheduler::worker::GCWorker;
use crate::vm::Binding;

/// A unit of GC work. Packets are scheduled into a bucket (one per phase
/// stage) and executed exactly once by whichever worker pops or steals
/// them.
pub trait GCWork<VM: Binding>: 'static + Send {
    fn do_work(&mut self, worker: &mut GCWorker<VM>, ctx: &CollectorContext<VM>);
}
