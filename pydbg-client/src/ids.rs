// Correlation id allocation
//
// Ids tag in-flight execute/enumerate requests. Released ids are handed out again
// before the counter grows, so the id space stays as small as peak concurrency.

use crate::types::CorrelationId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct IdDispenser {
    inner: Mutex<IdState>,
}

#[derive(Debug, Default)]
struct IdState {
    next: CorrelationId,
    free: BTreeSet<CorrelationId>,
}

impl IdDispenser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest released id if there is one, otherwise a fresh id from the counter
    pub fn allocate(&self) -> CorrelationId {
        let mut state = self.inner.lock();
        if let Some(id) = state.free.pop_first() {
            return id;
        }
        let id = state.next;
        state.next += 1;
        id
    }

    /// Return an id to the pool. Freeing the highest id shrinks the counter.
    pub fn free(&self, id: CorrelationId) {
        let mut state = self.inner.lock();

        if id < 0 || id >= state.next || state.free.contains(&id) {
            debug!("Ignoring free of unallocated id {}", id);
            return;
        }

        if id == state.next - 1 {
            state.next -= 1;
            // Released ids just below the new top collapse into the counter too
            while state.next > 0 {
                let top = state.next - 1;
                if !state.free.remove(&top) {
                    break;
                }
                state.next = top;
            }
        } else {
            state.free.insert(id);
        }
    }

    /// Number of ids currently handed out
    pub fn in_use(&self) -> usize {
        let state = self.inner.lock();
        state.next as usize - state.free.len()
    }
}
