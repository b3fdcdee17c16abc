/*
 * Codegraph Biabduction - Compositional memory-safety analysis
 *
 * Feature-First Layout:
 * - shared/      : Frontend models (Program, ProcedureDesc, Cfg, Instr)
 * - features/    : Vertical slices (heap → interpreter → summary → biabduction → scheduler → detectors)
 * - application/ : AnalysisService facade
 * - config/      : Presets, validation, YAML
 *
 * Each procedure is analyzed once against its callees' summaries; the
 * scheduler runs independent SCCs of the call graph on a rayon pool.
 */

#![allow(clippy::too_many_arguments)] // Interpreter helpers thread state explicitly
#![allow(clippy::type_complexity)] // Pending-path maps keyed by (rank, node)
#![allow(clippy::module_inception)] // scheduler::scheduler, interpreter::interpreter
#![allow(clippy::new_without_default)] // Default impl not always needed

pub mod application;
pub mod config;
pub mod errors;
pub mod features;
pub mod shared;

pub use application::{AnalysisReport, AnalysisService};
pub use config::{EngineConfig, Preset};
pub use errors::{AnalysisError, Result};
pub use features::biabduction::{Engine, Outcome, Spec, Summary, SummaryStatus};
pub use features::detectors::{DefectRecord, IncompleteRecord};
pub use features::scheduler::{ScheduleOutcome, Scheduler};
pub use features::summary::{SummaryLookup, SummaryStore};
pub use shared::models::{ErrorKind, ProcedureBuilder, ProcedureDesc, ProcedureId, Program};
