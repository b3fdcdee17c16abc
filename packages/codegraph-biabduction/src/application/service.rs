/*
 * Application: Analysis Service
 *
 * Program → Scheduler (bottom-up summaries) → detectors → AnalysisReport
 */

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::features::biabduction::{EngineStats, Summary};
use crate::features::detectors::{detect_defects, detect_retain_cycles, DefectRecord, IncompleteRecord};
use crate::features::scheduler::Scheduler;
use crate::features::summary::SummaryStore;
use crate::shared::models::{ErrorKind, ProcedureId, Program};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Everything one analysis run produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generation: u32,
    pub summaries: BTreeMap<ProcedureId, Summary>,
    pub defects: Vec<DefectRecord>,
    pub incomplete: Vec<IncompleteRecord>,
    pub stats: EngineStats,
    pub elapsed_ms: u64,
}

impl AnalysisReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn summary(&self, procedure: &str) -> Option<&Summary> {
        self.summaries.get(&ProcedureId::new(procedure))
    }

    pub fn defects_of_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &DefectRecord> {
        self.defects.iter().filter(move |d| d.kind == kind)
    }

    pub fn defects_in(&self, procedure: &str) -> impl Iterator<Item = &DefectRecord> + '_ {
        let procedure = ProcedureId::new(procedure);
        self.defects.iter().filter(move |d| d.procedure == procedure)
    }

    pub fn has_defects(&self) -> bool {
        !self.defects.is_empty()
    }
}

/// Entry point: analyze whole programs with one configuration
///
/// The summary store is shared across runs; every run opens a new
/// generation, so summaries of an earlier run stay readable by generation.
pub struct AnalysisService {
    scheduler: Scheduler,
}

impl AnalysisService {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(SummaryStore::new()))
    }

    pub fn with_store(config: EngineConfig, store: Arc<SummaryStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::with_store(config, store),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.scheduler.config()
    }

    pub fn store(&self) -> &Arc<SummaryStore> {
        self.scheduler.store()
    }

    pub fn analyze(&self, program: &Program) -> Result<AnalysisReport> {
        let outcome = self.scheduler.run(program)?;

        let mut defects = Vec::new();
        let mut cycles_seen = BTreeSet::new();
        for (id, summary) in &outcome.summaries {
            defects.extend(detect_defects(id, summary));
            if self.config().detect_retain_cycles {
                for (signature, record) in detect_retain_cycles(id, summary) {
                    if cycles_seen.insert(signature) {
                        defects.push(record);
                    }
                }
            }
        }

        info!(
            generation = outcome.generation,
            procedures = outcome.summaries.len(),
            defects = defects.len(),
            incomplete = outcome.incomplete.len(),
            "analysis report ready"
        );
        Ok(AnalysisReport {
            generation: outcome.generation,
            summaries: outcome
                .summaries
                .into_iter()
                .map(|(id, s)| (id, Summary::clone(&s)))
                .collect(),
            defects,
            incomplete: outcome.incomplete,
            stats: outcome.stats,
            elapsed_ms: outcome.elapsed_ms,
        })
    }
}
