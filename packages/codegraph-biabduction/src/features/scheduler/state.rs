//! Per-procedure scheduling state

use crate::shared::models::ProcedureId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureState {
    Unscheduled,
    /// Every callee outside its SCC has a final summary
    Ready,
    Analyzing,
    /// Final summary published
    Done,
}

/// Concurrent view of where each procedure is in the schedule
#[derive(Debug, Default)]
pub struct StateTracker {
    states: DashMap<ProcedureId, ProcedureState>,
}

impl StateTracker {
    pub fn new<'a>(procedures: impl IntoIterator<Item = &'a ProcedureId>) -> Self {
        let states = DashMap::new();
        for id in procedures {
            states.insert(id.clone(), ProcedureState::Unscheduled);
        }
        Self { states }
    }

    pub fn get(&self, id: &ProcedureId) -> Option<ProcedureState> {
        self.states.get(id).map(|s| *s.value())
    }

    pub fn mark_ready(&self, id: &ProcedureId) {
        self.set(id, ProcedureState::Ready);
    }

    pub fn mark_analyzing(&self, id: &ProcedureId) {
        self.set(id, ProcedureState::Analyzing);
    }

    pub fn mark_done(&self, id: &ProcedureId) {
        self.set(id, ProcedureState::Done);
    }

    fn set(&self, id: &ProcedureId, state: ProcedureState) {
        self.states.insert(id.clone(), state);
    }

    pub fn count(&self, state: ProcedureState) -> usize {
        self.states.iter().filter(|e| *e.value() == state).count()
    }

    pub fn all_done(&self) -> bool {
        self.states.iter().all(|e| *e.value() == ProcedureState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let ids = [ProcedureId::new("a"), ProcedureId::new("b")];
        let tracker = StateTracker::new(&ids);
        assert_eq!(tracker.count(ProcedureState::Unscheduled), 2);
        tracker.mark_ready(&ids[0]);
        tracker.mark_analyzing(&ids[0]);
        assert_eq!(tracker.get(&ids[0]), Some(ProcedureState::Analyzing));
        tracker.mark_done(&ids[0]);
        tracker.mark_done(&ids[1]);
        assert!(tracker.all_done());
    }
}
