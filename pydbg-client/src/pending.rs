// Pending request tables
//
// Maps correlation id -> continuation for requests whose answer arrives later on
// the dispatch task. Taking an entry removes it, so no continuation runs twice.

use crate::types::{CorrelationId, EvaluationResult, StackFrame};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Continuation for an execute-text request
pub type ExecuteCompletion = Box<dyn FnOnce(EvaluationResult) + Send + 'static>;

/// Continuation for an enumerate-children request
pub type ChildrenCompletion = Box<dyn FnOnce(Vec<EvaluationResult>) + Send + 'static>;

/// Everything needed to interpret a response: the continuation plus the
/// expression text and frame the request was made for.
pub struct PendingRequest<C> {
    pub completion: C,
    pub expression: String,
    pub frame: StackFrame,
}

pub struct PendingTable<C> {
    entries: Mutex<HashMap<CorrelationId, PendingRequest<C>>>,
}

impl<C> PendingTable<C> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: CorrelationId, request: PendingRequest<C>) {
        self.entries.lock().insert(id, request);
    }

    /// Remove and return the request for `id`
    pub fn take(&self, id: CorrelationId) -> Option<PendingRequest<C>> {
        self.entries.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every outstanding request. Dropping them without calling the
    /// continuations is how waiters learn the session ended.
    pub fn drain(&self) -> Vec<(CorrelationId, PendingRequest<C>)> {
        self.entries.lock().drain().collect()
    }
}

impl<C> Default for PendingTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
