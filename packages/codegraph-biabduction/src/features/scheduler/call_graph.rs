//! Call graph and its SCC condensation (petgraph)

use crate::shared::models::{ProcedureId, Program};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Strongly connected component of the call graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scc {
    /// Position in callee-first order
    pub id: usize,
    /// Sorted member procedures
    pub members: Vec<ProcedureId>,
    /// More than one member, or a procedure calling itself
    pub is_recursive: bool,
    /// SCCs this one calls into
    pub depends_on: BTreeSet<usize>,
}

/// Directed graph: caller → callee
///
/// Only procedures defined in the program are nodes; calls to undefined
/// procedures are left to the unknown-callee rule.
pub struct CallGraph {
    graph: DiGraph<ProcedureId, ()>,
    index: FxHashMap<ProcedureId, NodeIndex>,
}

impl CallGraph {
    pub fn from_program(program: &Program) -> Self {
        let mut graph = DiGraph::new();
        let mut index = FxHashMap::default();

        let ids: BTreeSet<&ProcedureId> = program.procedures.iter().map(|p| &p.id).collect();
        for id in ids {
            let idx = graph.add_node(id.clone());
            index.insert(id.clone(), idx);
        }
        for (caller, callee) in program.all_call_edges() {
            if let (Some(&from), Some(&to)) = (index.get(&caller), index.get(&callee)) {
                graph.update_edge(from, to, ());
            }
        }
        Self { graph, index }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn callees(&self, id: &ProcedureId) -> Vec<ProcedureId> {
        self.neighbors(id, Direction::Outgoing)
    }

    pub fn callers(&self, id: &ProcedureId) -> Vec<ProcedureId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &ProcedureId, dir: Direction) -> Vec<ProcedureId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<ProcedureId> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// SCCs in callee-first order
    ///
    /// Tarjan's algorithm emits an SCC only after every SCC reachable from
    /// it, which for caller → callee edges is exactly bottom-up order.
    pub fn sccs(&self) -> Vec<Scc> {
        let components = tarjan_scc(&self.graph);
        let mut scc_of: FxHashMap<NodeIndex, usize> = FxHashMap::default();
        for (id, comp) in components.iter().enumerate() {
            for &n in comp {
                scc_of.insert(n, id);
            }
        }

        components
            .iter()
            .enumerate()
            .map(|(id, comp)| {
                let mut members: Vec<ProcedureId> = comp.iter().map(|&n| self.graph[n].clone()).collect();
                members.sort();
                let self_loop = comp.iter().any(|&n| self.graph.contains_edge(n, n));
                let depends_on = comp
                    .iter()
                    .flat_map(|&n| self.graph.neighbors_directed(n, Direction::Outgoing))
                    .filter_map(|callee| scc_of.get(&callee).copied())
                    .filter(|&other| other != id)
                    .collect();
                Scc {
                    id,
                    is_recursive: comp.len() > 1 || self_loop,
                    members,
                    depends_on,
                }
            })
            .collect()
    }
}
