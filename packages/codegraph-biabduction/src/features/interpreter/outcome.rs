//! Result of interpreting one instruction on one path

use crate::features::biabduction::PathState;
use crate::features::heap::Sym;
use crate::shared::models::ErrorKind;

#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Continue with the next instruction
    Continue(PathState),
    /// Path-local defect; the path closes with an error spec
    Error {
        state: PathState,
        kind: ErrorKind,
        locations: Vec<Sym>,
    },
    /// `return`; frame scopes have exited and escapes were checked
    Return(PathState),
    /// Exception raised; control moves to the node's exception successors
    Throw(PathState),
    /// The path cannot be modeled further; the procedure is incomplete
    Abandon { state: PathState, reason: String },
}

impl StepOutcome {
    pub fn error(state: PathState, kind: ErrorKind, locations: Vec<Sym>) -> Self {
        StepOutcome::Error {
            state,
            kind,
            locations,
        }
    }

    pub fn state(&self) -> &PathState {
        match self {
            StepOutcome::Continue(s) | StepOutcome::Return(s) | StepOutcome::Throw(s) => s,
            StepOutcome::Error { state, .. } | StepOutcome::Abandon { state, .. } => state,
        }
    }

    pub fn state_mut(&mut self) -> &mut PathState {
        match self {
            StepOutcome::Continue(s) | StepOutcome::Return(s) | StepOutcome::Throw(s) => s,
            StepOutcome::Error { state, .. } | StepOutcome::Abandon { state, .. } => state,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StepOutcome::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
