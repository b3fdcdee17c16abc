//! Structured defect records

use crate::features::biabduction::{Summary, SummaryStatus, TraceStep};
use crate::features::heap::AbstractLocation;
use crate::shared::models::{ErrorKind, ProcedureId, Site};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One reported defect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub procedure: ProcedureId,
    pub kind: ErrorKind,
    /// Instruction sites on the offending path, in execution order
    pub trace: Vec<TraceStep>,
    pub locations: Vec<AbstractLocation>,
}

impl DefectRecord {
    /// Site where the defect manifests
    pub fn site(&self) -> Option<Site> {
        self.trace.last().map(|t| t.site)
    }
}

/// A procedure whose summary is not exhaustive; a quality signal, not a bug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteRecord {
    pub procedure: ProcedureId,
    pub kind: ErrorKind,
    pub reason: String,
}

impl IncompleteRecord {
    pub fn new(procedure: ProcedureId, reason: impl Into<String>) -> Self {
        Self {
            procedure,
            kind: ErrorKind::AnalysisIncomplete,
            reason: reason.into(),
        }
    }

    /// Record for a summary that is incomplete or unknown
    pub fn from_summary(summary: &Summary) -> Option<Self> {
        match &summary.status {
            SummaryStatus::Complete => None,
            SummaryStatus::Incomplete { reason } | SummaryStatus::Unknown { reason } => {
                Some(Self::new(summary.procedure.clone(), reason.clone()))
            }
        }
    }
}

/// Defects of `procedure`: one record per distinct (kind, site) among its
/// error specs
pub fn detect_defects(procedure: &ProcedureId, summary: &Summary) -> Vec<DefectRecord> {
    let mut seen: BTreeSet<(ErrorKind, Option<Site>)> = BTreeSet::new();
    let mut out = Vec::new();
    for spec in summary.error_specs() {
        let Some(kind) = spec.outcome.error_kind() else {
            continue;
        };
        if !kind.is_defect() {
            continue;
        }
        let record = DefectRecord {
            procedure: procedure.clone(),
            kind,
            trace: spec.witness.trace.clone(),
            locations: spec.witness.locations.clone(),
        };
        if seen.insert((kind, record.site())) {
            out.push(record);
        }
    }
    out
}
