//! Programmatic construction of procedures
//!
//! Used by tests and by embedders that build CFGs without going through JSON.

use super::instruction::{Instr, Instruction, NodeId};
use super::procedure::{
    Cfg, CfgNode, FormalDecl, LocalDecl, NodeKind, ParamKind, ProcedureDesc, ProcedureId,
    Storage,
};
use crate::errors::Result;
use std::collections::BTreeMap;

pub const START_NODE: NodeId = 0;
pub const EXIT_NODE: NodeId = 1;

/// Builder for `ProcedureDesc`
///
/// Start is node 0 and exit is node 1. `body` is the common case of one
/// straight-line statement node between them.
///
/// # Example
/// ```
/// use codegraph_biabduction::shared::models::{Instr, ProcedureBuilder};
///
/// let proc = ProcedureBuilder::new("f")
///     .formal("x")
///     .body(vec![Instr::free("x"), Instr::free("x")])
///     .build()
///     .unwrap();
/// assert_eq!(proc.cfg.nodes.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ProcedureBuilder {
    id: ProcedureId,
    formals: Vec<FormalDecl>,
    locals: Vec<LocalDecl>,
    nodes: BTreeMap<NodeId, CfgNode>,
    start_succs: Vec<NodeId>,
}

impl ProcedureBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            id: ProcedureId::new(name),
            formals: Vec::new(),
            locals: Vec::new(),
            nodes: BTreeMap::new(),
            start_succs: Vec::new(),
        }
    }

    /// Add a pointer formal
    pub fn formal(self, name: &str) -> Self {
        self.formal_kind(name, ParamKind::Pointer)
    }

    pub fn formal_kind(mut self, name: &str, kind: ParamKind) -> Self {
        self.formals.push(FormalDecl {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn local(mut self, name: &str, storage: Storage) -> Self {
        self.locals.push(LocalDecl {
            name: name.to_string(),
            storage,
            weak: false,
        });
        self
    }

    /// Add a body-scope local declared weak
    pub fn weak_local(mut self, name: &str) -> Self {
        self.locals.push(LocalDecl {
            name: name.to_string(),
            storage: Storage::default(),
            weak: true,
        });
        self
    }

    pub fn body(mut self, instrs: Vec<Instr>) -> Self {
        self.nodes.insert(
            2,
            CfgNode {
                id: 2,
                kind: NodeKind::Statement,
                instrs: instrs.into_iter().map(Instruction::from).collect(),
                succs: vec![EXIT_NODE],
                exn_succs: Vec::new(),
            },
        );
        self.start_succs = vec![2];
        self
    }

    pub fn node(mut self, id: NodeId, kind: NodeKind, instrs: Vec<Instr>, succs: Vec<NodeId>) -> Self {
        self.nodes.insert(
            id,
            CfgNode {
                id,
                kind,
                instrs: instrs.into_iter().map(Instruction::from).collect(),
                succs,
                exn_succs: Vec::new(),
            },
        );
        self
    }

    /// Add an exception edge `from -> handler`
    pub fn exn_edge(mut self, from: NodeId, handler: NodeId) -> Self {
        if let Some(node) = self.nodes.get_mut(&from) {
            node.exn_succs.push(handler);
        }
        self
    }

    pub fn start_to(mut self, succs: &[NodeId]) -> Self {
        self.start_succs = succs.to_vec();
        self
    }

    pub fn build(mut self) -> Result<ProcedureDesc> {
        if self.start_succs.is_empty() {
            // first user node, or straight to exit for an empty body
            self.start_succs = vec![self.nodes.keys().next().copied().unwrap_or(EXIT_NODE)];
        }
        let mut start = CfgNode::new(START_NODE, NodeKind::Start);
        start.succs = self.start_succs;
        self.nodes.insert(START_NODE, start);
        self.nodes
            .entry(EXIT_NODE)
            .or_insert_with(|| CfgNode::new(EXIT_NODE, NodeKind::Exit));

        let proc = ProcedureDesc {
            id: self.id,
            formals: self.formals,
            locals: self.locals,
            cfg: Cfg {
                start: START_NODE,
                exit: EXIT_NODE,
                nodes: self.nodes,
            },
        };
        proc.validate()?;
        Ok(proc)
    }
}
