//! Procedures, control-flow graphs and whole-program input

use super::instruction::{Instr, Instruction, NodeId, ScopeId, BODY_SCOPE};
use crate::errors::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Fully qualified procedure identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcedureId(String);

impl ProcedureId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcedureId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Role of a CFG node (SIL node kinds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Exit,
    #[default]
    Statement,
    Prune,
    /// Exception handler entry
    Exception,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgNode {
    pub id: NodeId,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub instrs: Vec<Instruction>,
    #[serde(default)]
    pub succs: Vec<NodeId>,
    /// Exception successors, taken by `Throw`
    #[serde(default)]
    pub exn_succs: Vec<NodeId>,
}

impl CfgNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            instrs: Vec::new(),
            succs: Vec::new(),
            exn_succs: Vec::new(),
        }
    }
}

/// Wire shape of a CFG: a node list plus start/exit ids
#[derive(Serialize, Deserialize)]
struct CfgRepr {
    start: NodeId,
    exit: NodeId,
    nodes: Vec<CfgNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CfgRepr", into = "CfgRepr")]
pub struct Cfg {
    pub start: NodeId,
    pub exit: NodeId,
    pub nodes: BTreeMap<NodeId, CfgNode>,
}

impl From<CfgRepr> for Cfg {
    fn from(repr: CfgRepr) -> Self {
        Self {
            start: repr.start,
            exit: repr.exit,
            nodes: repr.nodes.into_iter().map(|n| (n.id, n)).collect(),
        }
    }
}

impl From<Cfg> for CfgRepr {
    fn from(cfg: Cfg) -> Self {
        Self {
            start: cfg.start,
            exit: cfg.exit,
            nodes: cfg.nodes.into_values().collect(),
        }
    }
}

impl Cfg {
    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.nodes.get(&id)
    }

    /// Number of incoming edges (normal and exceptional) per node
    pub fn pred_counts(&self) -> BTreeMap<NodeId, usize> {
        let mut counts: BTreeMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for node in self.nodes.values() {
            for succ in node.succs.iter().chain(node.exn_succs.iter()) {
                *counts.entry(*succ).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Nodes with more than one predecessor
    pub fn join_nodes(&self) -> BTreeSet<NodeId> {
        self.pred_counts()
            .into_iter()
            .filter(|&(_, n)| n > 1)
            .map(|(id, _)| id)
            .collect()
    }

    /// Instructions in node order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.nodes.values().flat_map(|n| n.instrs.iter())
    }

    fn validate(&self, procedure: &ProcedureId) -> Result<()> {
        if !self.nodes.contains_key(&self.start) {
            return Err(AnalysisError::malformed(procedure, "missing start node"));
        }
        if !self.nodes.contains_key(&self.exit) {
            return Err(AnalysisError::malformed(procedure, "missing exit node"));
        }
        for node in self.nodes.values() {
            for succ in node.succs.iter().chain(node.exn_succs.iter()) {
                if !self.nodes.contains_key(succ) {
                    return Err(AnalysisError::malformed(
                        procedure,
                        format!("node {} has unknown successor {}", node.id, succ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Declared kind of a formal parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Raw pointer; may be null
    #[default]
    Pointer,
    /// Reference; never null
    Reference,
    /// Non-pointer value
    Scalar,
    /// Reference-counted strong property
    Strong,
    /// Reference-counted weak property
    Weak,
}

impl ParamKind {
    pub fn is_non_null(self) -> bool {
        matches!(self, ParamKind::Reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormalDecl {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
}

/// Storage duration of a local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Stack { scope: ScopeId },
    Static,
}

impl Default for Storage {
    fn default() -> Self {
        Storage::Stack { scope: BODY_SCOPE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: String,
    #[serde(default)]
    pub storage: Storage,
    /// Declared `__weak`: captures and ownership through it do not retain
    #[serde(default)]
    pub weak: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDesc {
    pub id: ProcedureId,
    #[serde(default)]
    pub formals: Vec<FormalDecl>,
    #[serde(default)]
    pub locals: Vec<LocalDecl>,
    pub cfg: Cfg,
}

impl ProcedureDesc {
    /// Storage of a local; undeclared variables live in the body scope
    pub fn storage_of(&self, var: &str) -> Storage {
        self.locals
            .iter()
            .find(|l| l.name == var)
            .map(|l| l.storage)
            .unwrap_or_default()
    }

    /// Whether a formal or local is declared weak
    pub fn is_weak(&self, var: &str) -> bool {
        self.formals
            .iter()
            .any(|f| f.name == var && f.kind == ParamKind::Weak)
            || self.locals.iter().any(|l| l.name == var && l.weak)
    }

    pub fn formal_names(&self) -> impl Iterator<Item = &str> {
        self.formals.iter().map(|f| f.name.as_str())
    }

    /// Distinct callees named by call instructions, in first-seen order
    pub fn callees(&self) -> Vec<ProcedureId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for instr in self.cfg.instructions() {
            if let Instr::Call { callee, .. } = &instr.instr {
                if seen.insert(callee.clone()) {
                    out.push(callee.clone());
                }
            }
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        self.cfg.validate(&self.id)
    }
}

/// Whole-program input: procedures plus extra call edges the frontend
/// resolved (e.g. virtual dispatch targets)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub procedures: Vec<ProcedureDesc>,
    #[serde(default)]
    pub call_edges: Vec<(ProcedureId, ProcedureId)>,
}

impl Program {
    pub fn new(procedures: Vec<ProcedureDesc>) -> Self {
        Self {
            procedures,
            call_edges: Vec::new(),
        }
    }

    /// Load a program from the frontend's JSON export
    pub fn from_json(json: &str) -> Result<Self> {
        let program: Program = serde_json::from_str(json)?;
        program.validate()?;
        Ok(program)
    }

    /// Every CFG well-formed and every procedure id defined once
    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for proc in &self.procedures {
            if !ids.insert(&proc.id) {
                return Err(AnalysisError::malformed(&proc.id, "duplicate procedure definition"));
            }
            proc.validate()?;
        }
        Ok(())
    }

    pub fn procedure(&self, id: &ProcedureId) -> Option<&ProcedureDesc> {
        self.procedures.iter().find(|p| &p.id == id)
    }

    /// Call edges from instructions plus declared edges, deduplicated and sorted
    pub fn all_call_edges(&self) -> BTreeSet<(ProcedureId, ProcedureId)> {
        let mut edges: BTreeSet<_> = self.call_edges.iter().cloned().collect();
        for proc in &self.procedures {
            for callee in proc.callees() {
                edges.insert((proc.id.clone(), callee));
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ProcedureBuilder;

    #[test]
    fn test_program_from_json() {
        let json = r#"{
            "procedures": [{
                "id": "main",
                "formals": [{"name": "p", "kind": "reference"}],
                "locals": [{"name": "g", "storage": "static"}],
                "cfg": {
                    "start": 0,
                    "exit": 1,
                    "nodes": [
                        {"id": 0, "kind": "start", "succs": [2]},
                        {"id": 2, "instrs": [{"kind": "call", "callee": "helper", "args": [{"var": "p"}]}], "succs": [1]},
                        {"id": 1, "kind": "exit"}
                    ]
                }
            }]
        }"#;
        let program = Program::from_json(json).unwrap();
        let main = program.procedure(&ProcedureId::new("main")).unwrap();
        assert_eq!(main.formals[0].kind, ParamKind::Reference);
        assert_eq!(main.storage_of("g"), Storage::Static);
        assert_eq!(main.storage_of("x"), Storage::Stack { scope: 0 });
        assert_eq!(main.callees(), vec![ProcedureId::new("helper")]);
        assert!(program
            .all_call_edges()
            .contains(&(ProcedureId::new("main"), ProcedureId::new("helper"))));
    }

    #[test]
    fn test_malformed_cfg_rejected() {
        let json = r#"{"procedures": [{"id": "f", "cfg": {"start": 0, "exit": 1,
            "nodes": [{"id": 0, "succs": [7]}, {"id": 1}]}}]}"#;
        let err = Program::from_json(json).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedCfg { .. }));
    }

    #[test]
    fn test_duplicate_procedure_rejected() {
        let f = || ProcedureBuilder::new("f").build().unwrap();
        let program = Program::new(vec![f(), ProcedureBuilder::new("g").build().unwrap(), f()]);
        match program.validate().unwrap_err() {
            AnalysisError::MalformedCfg { procedure, reason } => {
                assert_eq!(procedure, ProcedureId::new("f"));
                assert_eq!(reason, "duplicate procedure definition");
            }
            other => panic!("unexpected error {:?}", other),
        }

        let cfg = r#"{"start": 0, "exit": 1, "nodes": [{"id": 0, "succs": [1]}, {"id": 1}]}"#;
        let json = format!(
            r#"{{"procedures": [{{"id": "f", "cfg": {cfg}}}, {{"id": "f", "cfg": {cfg}}}]}}"#,
            cfg = cfg
        );
        assert!(matches!(
            Program::from_json(&json),
            Err(AnalysisError::MalformedCfg { .. })
        ));
    }

    #[test]
    fn test_join_nodes() {
        let proc = ProcedureBuilder::new("f")
            .node(2, NodeKind::Prune, vec![], vec![4])
            .node(3, NodeKind::Prune, vec![], vec![4])
            .node(4, NodeKind::Statement, vec![], vec![1])
            .start_to(&[2, 3])
            .build()
            .unwrap();
        assert_eq!(proc.cfg.join_nodes(), BTreeSet::from([4]));
    }
}
