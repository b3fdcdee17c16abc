//! Feature slices, bottom-up:
//! heap → interpreter → summary → biabduction → scheduler → detectors

pub mod biabduction;
pub mod detectors;
pub mod heap;
pub mod interpreter;
pub mod scheduler;
pub mod summary;
