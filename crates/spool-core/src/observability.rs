//! Per-state counts of a queue.

use serde::{Deserialize, Serialize};

use crate::domain::EntryState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub processing: usize,
    pub suspending: usize,
    pub finished: usize,
}

impl QueueCounts {
    pub fn get(&self, state: EntryState) -> usize {
        match state {
            EntryState::Waiting => self.waiting,
            EntryState::Processing => self.processing,
            EntryState::Suspending => self.suspending,
            EntryState::Finished => self.finished,
        }
    }

    pub fn total(&self) -> usize {
        self.waiting + self.processing + self.suspending + self.finished
    }

    pub(crate) fn increment(&mut self, state: EntryState) {
        *self.slot(state) += 1;
    }

    pub(crate) fn decrement(&mut self, state: EntryState) {
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    pub(crate) fn shift(&mut self, from: EntryState, to: EntryState) {
        self.decrement(from);
        self.increment(to);
    }

    fn slot(&mut self, state: EntryState) -> &mut usize {
        match state {
            EntryState::Waiting => &mut self.waiting,
            EntryState::Processing => &mut self.processing,
            EntryState::Suspending => &mut self.suspending,
            EntryState::Finished => &mut self.finished,
        }
    }
}
