//! What an analysis can see of other procedures' summaries

use super::store::SummaryStore;
use crate::features::biabduction::Summary;
use crate::shared::models::ProcedureId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Read-only summary source for the call resolver
///
/// `None` means no summary is available; the resolver then applies the
/// conservative unknown spec.
pub trait SummaryLookup: Sync {
    fn lookup(&self, procedure: &ProcedureId) -> Option<Arc<Summary>>;
}

impl SummaryLookup for SummaryStore {
    fn lookup(&self, procedure: &ProcedureId) -> Option<Arc<Summary>> {
        self.get_final(procedure)
    }
}

impl SummaryLookup for BTreeMap<ProcedureId, Arc<Summary>> {
    fn lookup(&self, procedure: &ProcedureId) -> Option<Arc<Summary>> {
        self.get(procedure).cloned()
    }
}

/// Every callee is unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSummaries;

impl SummaryLookup for NoSummaries {
    fn lookup(&self, _procedure: &ProcedureId) -> Option<Arc<Summary>> {
        None
    }
}

/// View used while analyzing one SCC
///
/// Callees outside the SCC resolve to their final summaries in
/// `generation`. Callees inside it resolve to the previous fixpoint round,
/// or to nothing in the first round.
pub struct GenerationView<'a> {
    store: &'a SummaryStore,
    generation: u32,
    partial: BTreeMap<ProcedureId, Arc<Summary>>,
    scc_members: BTreeSet<ProcedureId>,
}

impl<'a> GenerationView<'a> {
    pub fn new(store: &'a SummaryStore, generation: u32) -> Self {
        Self {
            store,
            generation,
            partial: BTreeMap::new(),
            scc_members: BTreeSet::new(),
        }
    }

    /// View for one fixpoint round of a recursive SCC
    pub fn for_round(
        store: &'a SummaryStore,
        generation: u32,
        scc_members: impl IntoIterator<Item = ProcedureId>,
        partial: BTreeMap<ProcedureId, Arc<Summary>>,
    ) -> Self {
        Self {
            store,
            generation,
            partial,
            scc_members: scc_members.into_iter().collect(),
        }
    }
}

impl SummaryLookup for GenerationView<'_> {
    fn lookup(&self, procedure: &ProcedureId) -> Option<Arc<Summary>> {
        if self.scc_members.contains(procedure) {
            return self.partial.get(procedure).cloned();
        }
        self.store.get(procedure, self.generation)
    }
}
