// Breakpoint registry
//
// Breakpoint ids come from a counter that never goes backwards, unlike request
// correlation ids. Bind state moves Unbound -> Bound or Unbound -> Failed once;
// removal deletes the entry without waiting for the debuggee.

use crate::types::BreakpointId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindState {
    Unbound,
    Bound,
    Failed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    /// Local path; mapped to the debuggee's path when bound
    pub filename: String,
    pub line: i32,
    pub condition: Option<String>,
    /// Break only when the condition's value changes
    pub break_when_changed: bool,
    pub state: BindState,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<BreakpointId, Breakpoint>,
    next_id: BreakpointId,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unbound breakpoint
    pub fn add(
        &mut self,
        filename: &str,
        line: i32,
        condition: Option<&str>,
        break_when_changed: bool,
    ) -> Breakpoint {
        let id = self.next_id;
        self.next_id += 1;

        let breakpoint = Breakpoint {
            id,
            filename: filename.to_string(),
            line,
            condition: condition.filter(|c| !c.is_empty()).map(str::to_string),
            break_when_changed,
            state: BindState::Unbound,
        };
        self.breakpoints.insert(id, breakpoint.clone());
        breakpoint
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn contains(&self, id: BreakpointId) -> bool {
        self.breakpoints.contains_key(&id)
    }

    /// All breakpoints ordered by id
    pub fn all(&self) -> Vec<Breakpoint> {
        let mut all: Vec<_> = self.breakpoints.values().cloned().collect();
        all.sort_by_key(|b| b.id);
        all
    }

    pub fn set_condition(
        &mut self,
        id: BreakpointId,
        condition: Option<&str>,
        break_when_changed: bool,
    ) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(&id)?;
        breakpoint.condition = condition.filter(|c| !c.is_empty()).map(str::to_string);
        breakpoint.break_when_changed = break_when_changed;
        Some(breakpoint.clone())
    }

    /// Record a bind success. Returns the breakpoint only on the Unbound -> Bound
    /// transition; unknown ids and already-settled breakpoints are no-ops.
    pub fn mark_bound(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.settle(id, BindState::Bound)
    }

    /// Record a bind failure, with the same rules as `mark_bound`
    pub fn mark_failed(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.settle(id, BindState::Failed)
    }

    fn settle(&mut self, id: BreakpointId, state: BindState) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(&id)?;
        if breakpoint.state != BindState::Unbound {
            debug!(
                "Breakpoint {} already {:?}, ignoring {:?}",
                id, breakpoint.state, state
            );
            return None;
        }
        breakpoint.state = state;
        Some(breakpoint.clone())
    }

    /// Delete the entry. The returned copy is in the `Removed` state.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        let mut breakpoint = self.breakpoints.remove(&id)?;
        breakpoint.state = BindState::Removed;
        Some(breakpoint)
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_never_reused() {
        let mut registry = BreakpointRegistry::new();
        let a = registry.add("a.py", 10, None, false);
        let b = registry.add("a.py", 11, None, false);
        registry.remove(b.id);
        let c = registry.add("a.py", 12, None, false);

        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(c.id, 2);
    }

    #[test]
    fn test_bind_succeeds_once() {
        let mut registry = BreakpointRegistry::new();
        let bp = registry.add("a.py", 10, Some("x > 1"), true);
        assert_eq!(bp.state, BindState::Unbound);
        assert_eq!(bp.condition.as_deref(), Some("x > 1"));

        let bound = registry.mark_bound(bp.id).unwrap();
        assert_eq!(bound.state, BindState::Bound);

        assert!(registry.mark_bound(bp.id).is_none());
        assert!(registry.mark_failed(bp.id).is_none());
        assert_eq!(registry.get(bp.id).unwrap().state, BindState::Bound);
    }

    #[test]
    fn test_failed_never_becomes_bound() {
        let mut registry = BreakpointRegistry::new();
        let bp = registry.add("a.py", 10, None, false);

        assert_eq!(registry.mark_failed(bp.id).unwrap().state, BindState::Failed);
        assert!(registry.mark_bound(bp.id).is_none());
        assert_eq!(registry.get(bp.id).unwrap().state, BindState::Failed);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut registry = BreakpointRegistry::new();
        assert!(registry.mark_bound(5).is_none());
        assert!(registry.mark_failed(5).is_none());
        assert!(registry.remove(5).is_none());
    }

    #[test]
    fn test_remove_then_bind_is_noop() {
        let mut registry = BreakpointRegistry::new();
        let bp = registry.add("a.py", 10, None, false);

        let removed = registry.remove(bp.id).unwrap();
        assert_eq!(removed.state, BindState::Removed);
        assert!(!registry.contains(bp.id));
        assert!(registry.mark_bound(bp.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_condition() {
        let mut registry = BreakpointRegistry::new();
        let bp = registry.add("a.py", 10, Some(""), false);
        assert_eq!(bp.condition, None);

        let updated = registry.set_condition(bp.id, Some("n == 3"), true).unwrap();
        assert_eq!(updated.condition.as_deref(), Some("n == 3"));
        assert!(updated.break_when_changed);
        assert!(registry.set_condition(99, None, false).is_none());
    }
}
