//! The marking and pointer-adjusting closures.

use crate::plan::CollectorContext;
use crate::scheduler::{BucketStage, GCWorker};
use crate::util::{Address, ObjectReference};
use crate::vm::{load_slot, store_slot, Binding, HeaderState, ObjectModel};
use std::sync::atomic::Ordering;

use super::gc_work::{MarkArrayChunk, ProcessMarkedObjects};

/// Transitive-closure tracer owned by one worker for the duration of one
/// packet. Newly marked objects accumulate in a local buffer which is
/// drained depth-first; when the buffer grows past the flush threshold,
/// half of it is packaged into a stealable packet.
pub(crate) struct MarkTrace<'a, VM: Binding> {
    ctx: &'a CollectorContext<VM>,
    worker: &'a GCWorker<VM>,
    buffer: Vec<ObjectReference>,
}

impl<'a, VM: Binding> MarkTrace<'a, VM> {
    pub fn new(ctx: &'a CollectorContext<VM>, worker: &'a GCWorker<VM>) -> Self {
        MarkTrace {
            ctx,
            worker,
            buffer: Vec::new(),
        }
    }

    pub fn with_buffer(
        ctx: &'a CollectorContext<VM>,
        worker: &'a GCWorker<VM>,
        buffer: Vec<ObjectReference>,
    ) -> Self {
        MarkTrace {
            ctx,
            worker,
            buffer,
        }
    }

    pub fn trace_slot(&mut self, slot: Address) {
        let object = load_slot(slot);
        if !object.is_null() {
            self.trace_object(object);
        }
    }

    /// Mark and enqueue an object. The bitmap race is the single point of
    /// truth: exactly one caller wins, and only the winner touches the
    /// header, the live counters and the queue.
    pub fn trace_object(&mut self, object: ObjectReference) {
        let addr = object.to_address();
        debug_assert!(self.ctx.heap.contains(addr), "{} outside the heap", object);
        if !self.ctx.mark_bitmap.mark(addr) {
            return;
        }
        if let Some(word) = VM::Model::init_mark(object) {
            self.ctx
                .preserved_marks
                .push(self.worker.ordinal, object, word);
        }
        let words = VM::Model::size(object);
        let region = self.ctx.heap.region_for_addr(addr);
        region.add_live(words, self.ctx.heap.cfls_adjusted_size(words));
        let counters = &self.ctx.cycle.counters;
        counters.live_objects.fetch_add(1, Ordering::Relaxed);
        counters.live_words.fetch_add(words, Ordering::Relaxed);
        self.buffer.push(object);
    }

    /// Follow the contents of every buffered object until the buffer runs
    /// dry, spilling excess work for other workers to steal.
    pub fn complete_trace(&mut self) {
        while let Some(object) = self.buffer.pop() {
            self.scan(object);
            if self.buffer.len() > self.ctx.options.mark_buffer_cap {
                let spill = self.buffer.split_off(self.buffer.len() / 2);
                self.closure_bucket()
                    .add(ProcessMarkedObjects::new(spill));
            }
        }
    }

    fn closure_bucket(&self) -> &crate::scheduler::WorkBucket<VM> {
        &self.worker.scheduler().work_buckets[BucketStage::Closure]
    }

    fn scan(&mut self, object: ObjectReference) {
        let chunk_len = self.ctx.options.array_chunk_len;
        if VM::Model::is_reference_array(object) && VM::Model::array_length(object) >= chunk_len {
            // Huge arrays would otherwise pin one worker (and its stack)
            // on a single object; trace them as independent chunk packets.
            let len = VM::Model::array_length(object);
            let mut chunks: Vec<Box<dyn crate::scheduler::GCWork<VM>>> = Vec::new();
            let mut start = 0;
            while start < len {
                let end = (start + chunk_len).min(len);
                chunks.push(Box::new(MarkArrayChunk::new(object, start, end)));
                start = end;
            }
            self.closure_bucket().bulk_add(chunks);
        } else {
            let mut visitor = |slot: Address| self.trace_slot(slot);
            VM::Model::scan_object(object, &mut visitor);
        }
    }
}

/// Rewrite one pointer slot to its referent's forwarded address. A tagged
/// null forwardee means the referent is not moving; null slots are
/// untouched.
pub(crate) fn adjust_slot<VM: Binding>(slot: Address) {
    let object = load_slot(slot);
    if object.is_null() {
        return;
    }
    if let HeaderState::MarkedForwarded(new) = VM::Model::header_state(object) {
        store_slot(slot, ObjectReference::from_address(new));
    }
}
