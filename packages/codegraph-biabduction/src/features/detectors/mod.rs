//! Defect detectors
//!
//! Read-only passes over published summaries:
//! - path-local defects are the error specs themselves
//! - retain cycles are strong-only cycles in the ownership graph of Ok posts

pub mod defects;
pub mod retain_cycle;

pub use defects::{detect_defects, DefectRecord, IncompleteRecord};
pub use retain_cycle::{detect_retain_cycles, OwnershipGraph, RetainCycle, RetainCycleDetector};
