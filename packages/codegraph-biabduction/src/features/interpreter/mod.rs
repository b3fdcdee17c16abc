//! Instruction Interpreter
//!
//! One step per CFG instruction: `Interpreter::step` maps a path state to
//! zero or more successor outcomes. Zero outcomes means the path is
//! infeasible; more than one means the instruction forked (nullable
//! allocation, several matching callee specs).
//!
//! ```text
//! Load / Store / OwnershipAssign   deref, abduce missing footprint edges
//! Free / Destructor / Construct    validity transitions
//! AddressOf / Enter/ExitScope      stack slots and scope instances
//! CaptureClosure / InvokeClosure   byRef slots, byValue snapshots
//! Prune                            pure constraints, null-check tags
//! Call                             delegated to summary::CallResolver
//! ```

pub mod interpreter;
pub mod outcome;

pub use interpreter::{AbductionMode, Interpreter};
pub use outcome::StepOutcome;
