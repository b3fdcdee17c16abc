//! Append-only summary store

use crate::errors::{AnalysisError, Result};
use crate::features::biabduction::Summary;
use crate::shared::models::ProcedureId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fixpoint round of a recursive SCC, or the final published summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    Fixpoint(u32),
    Final,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Round::Fixpoint(r) => write!(f, "round {}", r),
            Round::Final => f.write_str("final"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SummaryKey {
    pub procedure: ProcedureId,
    pub generation: u32,
    pub round: Round,
}

/// Concurrent write-once map of summaries
///
/// A generation is one scheduling run. Re-analysis after a change starts a
/// new generation; earlier generations stay readable.
#[derive(Debug, Default)]
pub struct SummaryStore {
    entries: DashMap<SummaryKey, Arc<Summary>>,
    generation: AtomicU32,
}

impl SummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new generation and return its number
    pub fn begin_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publish the final summary of a procedure for `generation`
    pub fn publish(&self, generation: u32, summary: Summary) -> Result<Arc<Summary>> {
        self.publish_round(generation, Round::Final, summary)
    }

    /// Publish a summary; fails if the key was already written
    pub fn publish_round(&self, generation: u32, round: Round, summary: Summary) -> Result<Arc<Summary>> {
        let key = SummaryKey {
            procedure: summary.procedure.clone(),
            generation,
            round,
        };
        match self.entries.entry(key) {
            Entry::Occupied(e) => Err(AnalysisError::AlreadyPublished {
                procedure: e.key().procedure.clone(),
                generation,
                round: round.to_string(),
            }),
            Entry::Vacant(e) => {
                let summary = Arc::new(summary);
                e.insert(Arc::clone(&summary));
                Ok(summary)
            }
        }
    }

    /// Final summary of `procedure` in `generation`
    pub fn get(&self, procedure: &ProcedureId, generation: u32) -> Option<Arc<Summary>> {
        self.get_round(procedure, generation, Round::Final)
    }

    pub fn get_round(&self, procedure: &ProcedureId, generation: u32, round: Round) -> Option<Arc<Summary>> {
        let key = SummaryKey {
            procedure: procedure.clone(),
            generation,
            round,
        };
        self.entries.get(&key).map(|e| Arc::clone(e.value()))
    }

    /// Final summary in the current generation
    pub fn get_final(&self, procedure: &ProcedureId) -> Option<Arc<Summary>> {
        self.get(procedure, self.current_generation())
    }

    /// All final summaries of `generation`, ordered by procedure
    pub fn final_summaries(&self, generation: u32) -> BTreeMap<ProcedureId, Arc<Summary>> {
        self.entries
            .iter()
            .filter(|e| e.key().generation == generation && e.key().round == Round::Final)
            .map(|e| (e.key().procedure.clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
