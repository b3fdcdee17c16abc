//! Error types for codegraph-biabduction
//!
//! Defects found by the analysis are not errors: they are recorded as
//! `ErrorKind` outcomes on specs. `AnalysisError` covers the cases where a
//! procedure (or the run) could not be analyzed at all.

use crate::config::ConfigError;
use crate::shared::models::{ProcedureId, Site};
use thiserror::Error;

/// Main error type for analysis operations
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The frontend emitted an instruction the interpreter cannot model
    #[error("Unsupported instruction at {site}: {description}")]
    UnsupportedInstruction { site: Site, description: String },

    /// CFG references a node that does not exist, or lacks start/exit
    #[error("Malformed CFG for '{procedure}': {reason}")]
    MalformedCfg {
        procedure: ProcedureId,
        reason: String,
    },

    /// Per-procedure instruction budget exhausted
    #[error("Step budget of {budget} instructions exhausted")]
    StepBudget { budget: usize },

    /// Wall-clock budget exhausted
    #[error("Analysis timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// A summary entry is write-once per (procedure, generation, round)
    #[error("Summary for '{procedure}' already published in generation {generation} ({round})")]
    AlreadyPublished {
        procedure: ProcedureId,
        generation: u32,
        round: String,
    },

    /// Replaying a spec needed a resource its precondition does not provide
    #[error("Replay diverged at {site}: {reason}")]
    ReplayDiverged { site: Site, reason: String },

    /// A worker panicked while analyzing a procedure
    #[error("Worker panicked while analyzing '{procedure}': {message}")]
    WorkerPanic {
        procedure: ProcedureId,
        message: String,
    },

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    /// Create a malformed-CFG error
    pub fn malformed(procedure: &ProcedureId, reason: impl Into<String>) -> Self {
        AnalysisError::MalformedCfg {
            procedure: procedure.clone(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from an exhausted budget rather than bad input
    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            AnalysisError::StepBudget { .. } | AnalysisError::Timeout { .. }
        )
    }
}

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
