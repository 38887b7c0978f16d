//! Side storage for header words displaced by marking.
//!
//! Some object models keep reversible side information (e.g. an identity
//! hash) in the same header word the mark overwrites. The displaced word is
//! saved here by whichever worker wins the marking race, relocated along
//! with its object during pointer adjustment, and written back once
//! compaction has placed the object.

use std::sync::Mutex;

use crate::util::ObjectReference;
use crate::vm::{Binding, ObjectModel};

pub struct PreservedMark {
    pub object: ObjectReference,
    pub word: usize,
}

/// One stack per worker ordinal; pushes during marking never contend with
/// other workers.
pub struct PreservedMarksSet {
    stacks: Vec<Mutex<Vec<PreservedMark>>>,
}

impl PreservedMarksSet {
    pub fn new(workers: usize) -> Self {
        PreservedMarksSet {
            stacks: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub fn stacks(&self) -> usize {
        self.stacks.len()
    }

    pub fn push(&self, ordinal: usize, object: ObjectReference, word: usize) {
        self.stacks[ordinal].lock().unwrap().push(PreservedMark { object, word });
    }

    /// Rewrite the saved object addresses to their forwarded locations.
    /// Runs during the adjust phase, one packet per stack.
    pub fn adjust<VM: Binding>(&self, ordinal: usize) {
        let mut stack = self.stacks[ordinal].lock().unwrap();
        for entry in stack.iter_mut() {
            if let Some(new) = VM::Model::forwardee(entry.object) {
                entry.object = ObjectReference::from_address(new);
            }
        }
    }

    /// Write every saved word back into its (relocated) object's header.
    pub fn restore<VM: Binding>(&self, ordinal: usize) {
        let mut stack = self.stacks[ordinal].lock().unwrap();
        for entry in stack.drain(..) {
            VM::Model::restore_displaced(entry.object, entry.word);
        }
    }

    pub fn reset(&self) {
        for stack in &self.stacks {
            stack.lock().unwrap().clear();
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.stacks.iter().map(|s| s.lock().unwrap().len()).sum()
    }
}
