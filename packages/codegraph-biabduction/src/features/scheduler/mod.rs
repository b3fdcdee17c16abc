//! Bottom-up scheduling of procedure analyses
//!
//! ```text
//! call_graph  Program ─▶ petgraph DiGraph ─▶ tarjan SCCs, callee-first
//! state       per-procedure Unscheduled → Ready → Analyzing → Done
//! scheduler   rayon scope over SCCs, fixpoint rounds for recursion
//! ```

mod call_graph;
mod scheduler;
mod state;

pub use call_graph::{CallGraph, Scc};
pub use scheduler::{ScheduleOutcome, Scheduler};
pub use state::{ProcedureState, StateTracker};
