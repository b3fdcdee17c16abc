//! Specs and summaries
//!
//! A `Spec` is one explored path of a procedure: the footprint it needed
//! (pre), the state it produced (post) and how it ended. A `Summary` is the
//! set of specs published for a procedure.

use crate::features::heap::{AbstractLocation, Canonicalizer, SymbolicHeap, Sym, Value};
use crate::shared::models::{ErrorKind, NodeId, ProcedureId, Site, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error(ErrorKind),
}

impl Outcome {
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            Outcome::Ok => None,
            Outcome::Error(kind) => Some(kind),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => f.write_str("OK"),
            Outcome::Error(kind) => write!(f, "{}", kind),
        }
    }
}

/// One interpreted instruction on a witness path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceStep {
    pub site: Site,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

/// How a spec's path was explored; enough to replay it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub trace: Vec<TraceStep>,
    /// Locations involved in the defect (error specs only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<AbstractLocation>,
    /// CFG nodes in visiting order
    pub path: Vec<NodeId>,
    /// Outcome index picked at each instruction that forked
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<u32>,
    /// The path went through a join; the post over-approximates it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub joined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    /// Initial values of the formals
    pub formals: Vec<Value>,
    pub pre: SymbolicHeap,
    pub post: SymbolicHeap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret: Option<Value>,
    pub outcome: Outcome,
    /// The procedure exits by an uncaught exception
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exceptional: bool,
    #[serde(default)]
    pub witness: Witness,
}

impl Spec {
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    /// Key equal for specs identical up to renaming of symbols
    pub fn canonical_key(&self) -> String {
        let mut canon = Canonicalizer::new();
        for f in &self.formals {
            canon.visit_value(*f);
        }
        canon.visit_heap(&self.pre, &self.formals);
        let mut roots = self.formals.clone();
        if let Some(r) = self.ret {
            canon.visit_value(r);
            roots.push(r);
        }
        canon.visit_heap(&self.post, &roots);

        let formals: Vec<Value> = self.formals.iter().map(|v| canon.value(*v)).collect();
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{}",
            formals,
            canon.heap(&self.pre),
            canon.heap(&self.post),
            self.ret.map(|v| canon.value(v)),
            self.outcome,
            self.exceptional
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    /// Some paths were abandoned; the specs cover only what was explored
    Incomplete { reason: String },
    /// Analysis failed; the summary is the conservative unknown spec
    Unknown { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub procedure: ProcedureId,
    pub specs: Vec<Spec>,
    pub status: SummaryStatus,
}

impl Summary {
    /// Conservative summary: empty pre, unconstrained post, fresh return, Ok
    pub fn unknown(procedure: ProcedureId, n_formals: usize, reason: impl Into<String>) -> Self {
        Self {
            procedure,
            specs: vec![unknown_spec(n_formals)],
            status: SummaryStatus::Unknown {
                reason: reason.into(),
            },
        }
    }

    pub fn ok_specs(&self) -> impl Iterator<Item = &Spec> {
        self.specs.iter().filter(|s| s.is_ok())
    }

    pub fn error_specs(&self) -> impl Iterator<Item = &Spec> {
        self.specs.iter().filter(|s| !s.is_ok())
    }

    pub fn is_incomplete(&self) -> bool {
        !matches!(self.status, SummaryStatus::Complete)
    }

    /// Canonical keys of all specs, sorted; equal for converged rounds
    pub fn canonical_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.specs.iter().map(Spec::canonical_key).collect();
        keys.sort();
        keys
    }
}

pub(crate) fn unknown_spec(n_formals: usize) -> Spec {
    Spec {
        formals: (0..n_formals as u32).map(|i| Value::sym(Sym(i))).collect(),
        pre: SymbolicHeap::new(),
        post: SymbolicHeap::new(),
        ret: Some(Value::sym(Sym(n_formals as u32))),
        outcome: Outcome::Ok,
        exceptional: false,
        witness: Witness::default(),
    }
}
