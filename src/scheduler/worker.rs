use crossbeam::deque::{Stealer, Worker};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::scheduler::GCWorkScheduler;
use super::GCWork;
use crate::plan::CollectorContext;
use crate::vm::Binding;

/// The part of a worker other workers may touch: its steal handle.
pub(crate) struct GCWorkerShared<VM: Binding> {
    pub stealer: Stealer<Box<dyn GCWork<VM>>>,
}

/// A GC worker thread. Privately owns its local work deque; everything
/// else is shared through the scheduler and the collector context.
pub struct GCWorker<VM: Binding> {
    /// Worker ordinal, 0 to the worker count minus one. Indexes the
    /// per-worker structures (preserved-marks stacks, steal handles).
    pub ordinal: usize,
    scheduler: Arc<GCWorkScheduler<VM>>,
    ctx: Arc<CollectorContext<VM>>,
    pub(crate) local_work_buffer: Worker<Box<dyn GCWork<VM>>>,
}

impl<VM: Binding> GCWorker<VM> {
    pub fn scheduler(&self) -> &GCWorkScheduler<VM> {
        &self.scheduler
    }

    fn run(mut self) {
        trace!("gc worker {} running", self.ordinal);
        let scheduler = self.scheduler.clone();
        let ctx = self.ctx.clone();
        while let Some(mut work) = scheduler.poll(&self) {
            work.do_work(&mut self, &ctx);
        }
        trace!("gc worker {} exiting", self.ordinal);
    }
}

/// The fixed gang of workers. Deques are created eagerly so the stealers
/// exist before any thread starts; the deque halves are handed to their
/// threads at spawn.
pub(crate) struct WorkerGroup<VM: Binding> {
    pub shared: Vec<Arc<GCWorkerShared<VM>>>,
    deques: Mutex<Vec<Option<Worker<Box<dyn GCWork<VM>>>>>>,
}

impl<VM: Binding> WorkerGroup<VM> {
    pub fn new(workers: usize) -> Arc<Self> {
        let mut shared = Vec::with_capacity(workers);
        let mut deques = Vec::with_capacity(workers);
        for _ in 0..workers {
            let deque = Worker::new_fifo();
            shared.push(Arc::new(GCWorkerShared {
                stealer: deque.stealer(),
            }));
            deques.push(Some(deque));
        }
        Arc::new(WorkerGroup {
            shared,
            deques: Mutex::new(deques),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.shared.len()
    }

    pub fn spawn(
        &self,
        scheduler: &Arc<GCWorkScheduler<VM>>,
        ctx: &Arc<CollectorContext<VM>>,
    ) -> Vec<JoinHandle<()>> {
        let mut deques = self.deques.lock().unwrap();
        let mut handles = Vec::with_capacity(deques.len());
        for (ordinal, slot) in deques.iter_mut().enumerate() {
            let worker = GCWorker {
                ordinal,
                scheduler: scheduler.clone(),
                ctx: ctx.clone(),
                local_work_buffer: slot.take().expect("worker spawned twice"),
            };
            let handle = std::thread::Builder::new()
                .name(format!("gc-worker-{}", ordinal))
                .spawn(move || worker.run())
                .expect("failed to spawn GC worker");
            handles.push(handle);
        }
        handles
    }
}
