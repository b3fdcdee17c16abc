//! Retain-cycle detection over ownership edges
//!
//! ```text
//!   A ──strong──▶ B ──strong──▶ C
//!   ▲                           │
//!   └──────────strong───────────┘     reported
//!
//!   A ──strong──▶ B ──weak────▶ C ──strong──▶ A     not reported
//! ```
//! Weak edges never keep an object alive, so only the strong subgraph is
//! searched. Every node of a non-trivial SCC of that subgraph lies on an
//! all-strong cycle.

use super::defects::DefectRecord;
use crate::features::biabduction::Summary;
use crate::features::heap::{AbstractLocation, Sym, SymbolicHeap};
use crate::shared::models::{ErrorKind, ProcedureId, Strength};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ownership edges of one heap as a graph
pub struct OwnershipGraph {
    graph: DiGraph<AbstractLocation, Strength>,
    index: FxHashMap<Sym, NodeIndex>,
}

impl OwnershipGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn from_heap(heap: &SymbolicHeap) -> Self {
        let mut g = Self::new();
        for (owner, _, target, strength) in heap.ownership_edges() {
            g.add_edge(heap.describe(owner), heap.describe(target), strength);
        }
        g
    }

    fn node(&mut self, loc: AbstractLocation) -> NodeIndex {
        if let Some(&idx) = self.index.get(&loc.sym) {
            return idx;
        }
        let sym = loc.sym;
        let idx = self.graph.add_node(loc);
        self.index.insert(sym, idx);
        idx
    }

    pub fn add_edge(&mut self, owner: AbstractLocation, target: AbstractLocation, strength: Strength) {
        let from = self.node(owner);
        let to = self.node(target);
        self.graph.add_edge(from, to, strength);
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Subgraph keeping only strong edges
    fn strong(&self) -> DiGraph<AbstractLocation, ()> {
        self.graph.filter_map(
            |_, n| Some(n.clone()),
            |_, s| (*s == Strength::Strong).then_some(()),
        )
    }
}

impl Default for OwnershipGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Objects that keep each other alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainCycle {
    /// Sorted by symbol
    pub members: Vec<AbstractLocation>,
}

impl RetainCycle {
    /// Symbol-independent identity, used to report a cycle once even when
    /// it shows up in the posts of several procedures
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = self
            .members
            .iter()
            .map(|m| match &m.origin {
                Some(o) => o.to_string(),
                None => "?".to_string(),
            })
            .collect();
        parts.sort();
        parts.join(" <-> ")
    }
}

pub struct RetainCycleDetector;

impl RetainCycleDetector {
    pub fn detect(graph: &OwnershipGraph) -> Vec<RetainCycle> {
        let strong = graph.strong();
        let mut cycles: Vec<RetainCycle> = tarjan_scc(&strong)
            .into_iter()
            .filter(|comp| match comp.as_slice() {
                [single] => strong.edges(*single).any(|e| e.target() == *single),
                _ => true,
            })
            .map(|comp| {
                let mut members: Vec<AbstractLocation> =
                    comp.into_iter().map(|n| strong[n].clone()).collect();
                members.sort_by_key(|m| m.sym);
                RetainCycle { members }
            })
            .collect();
        cycles.sort_by(|a, b| a.members.cmp(&b.members));
        cycles
    }
}

/// Retain cycles in the Ok postconditions of `summary`, one record per
/// distinct cycle signature
pub fn detect_retain_cycles(procedure: &ProcedureId, summary: &Summary) -> Vec<(String, DefectRecord)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for spec in summary.ok_specs() {
        let graph = OwnershipGraph::from_heap(&spec.post);
        if graph.edge_count() == 0 {
            continue;
        }
        for cycle in RetainCycleDetector::detect(&graph) {
            let signature = cycle.signature();
            if !seen.insert(signature.clone()) {
                continue;
            }
            out.push((
                signature,
                DefectRecord {
                    procedure: procedure.clone(),
                    kind: ErrorKind::RetainCycle,
                    trace: spec.witness.trace.clone(),
                    locations: cycle.members,
                },
            ));
        }
    }
    out
}
