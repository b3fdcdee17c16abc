//! Abstract Heap Domain
//!
//! Symbolic memory in the style of separation logic: disjoint cells with
//! functional points-to edges, validity tags, ownership edges for
//! reference-counted objects, and a pure part decided by `pure::PureState`.
//!
//! # References
//! - Reynolds, J. C. "Separation Logic: A Logic for Shared Mutable Data Structures" (LICS 2002)
//! - Calcagno, C. et al. "Compositional Shape Analysis by means of Bi-Abduction" (POPL 2009)
//!
//! ## Operations
//! - `SymbolicHeap::join`: merge two states reached from different branches
//! - `SymbolicHeap::is_feasible`: prune infeasible paths
//! - `entailment::subtract`: footprint removal, yielding frame and remainder

pub mod canonical;
pub mod domain;
pub mod entailment;
pub mod pure;
pub mod symbolic_heap;

pub use canonical::Canonicalizer;
pub use domain::{AbstractLocation, HeapCell, LocOrigin, OwnershipEdge, Sym, ValidityTag, Value};
pub use entailment::{subtract, Bindings, MatchFailure, Subtraction};
pub use pure::{PureAtom, PureState};
pub use symbolic_heap::SymbolicHeap;
