//! Intra-procedural bi-abductive symbolic execution
//!
//! The engine explores a procedure's CFG with a disjunctive set of path
//! states, abducing the footprint each path needs as it goes. Every closed
//! path becomes a `Spec`; the specs together are the procedure's `Summary`.
//!
//! References:
//! - Calcagno, Distefano, O'Hearn, Yang. "Compositional Shape Analysis by
//!   means of Bi-Abduction" (POPL 2009)
//! - Infer biabduction (Pulse predecessor) spec table design

pub mod engine;
pub mod path_state;
pub mod replay;
pub mod spec;

pub use engine::{Engine, EngineStats, ProcedureResult};
pub use path_state::PathState;
pub use replay::ReplayResult;
pub(crate) use spec::unknown_spec;
pub use spec::{Outcome, Spec, Summary, SummaryStatus, TraceStep, Witness};
