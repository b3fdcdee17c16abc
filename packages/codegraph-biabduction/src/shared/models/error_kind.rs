//! Defect taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome tag of an erroneous path, or a procedure-level quality signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NullDeref,
    UseAfterFree,
    DoubleFree,
    DanglingReference,
    UseAfterScope,
    UseAfterDestructor,
    DoubleDestruct,
    RetainCycle,
    /// Budget, timeout or unsupported input; never reported as a bug
    AnalysisIncomplete,
}

impl ErrorKind {
    /// Detected while interpreting one path; terminates only that path
    pub fn is_path_local(self) -> bool {
        !matches!(self, ErrorKind::RetainCycle | ErrorKind::AnalysisIncomplete)
    }

    pub fn is_defect(self) -> bool {
        self != ErrorKind::AnalysisIncomplete
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NullDeref => "NULL_DEREFERENCE",
            ErrorKind::UseAfterFree => "USE_AFTER_FREE",
            ErrorKind::DoubleFree => "DOUBLE_FREE",
            ErrorKind::DanglingReference => "DANGLING_POINTER_DEREFERENCE",
            ErrorKind::UseAfterScope => "USE_AFTER_LIFETIME",
            ErrorKind::UseAfterDestructor => "USE_AFTER_DELETE",
            ErrorKind::DoubleDestruct => "DOUBLE_DELETE",
            ErrorKind::RetainCycle => "RETAIN_CYCLE",
            ErrorKind::AnalysisIncomplete => "ANALYSIS_INCOMPLETE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
