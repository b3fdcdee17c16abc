//! Shared helpers for the integration tests

#![allow(dead_code)]

use codegraph_biabduction::shared::models::{
    Cond, Expr, Instr, NodeKind, ProcedureBuilder, ProcedureDesc, Program, EXIT_NODE,
};
use codegraph_biabduction::{AnalysisReport, AnalysisService, EngineConfig, ErrorKind};

/// Default config pinned to one worker so runs are reproducible
pub fn sequential() -> EngineConfig {
    EngineConfig::default().worker_threads(1)
}

pub fn analyze(procedures: Vec<ProcedureDesc>) -> AnalysisReport {
    analyze_with(sequential(), procedures)
}

pub fn analyze_with(config: EngineConfig, procedures: Vec<ProcedureDesc>) -> AnalysisReport {
    AnalysisService::new(config)
        .expect("valid config")
        .analyze(&Program::new(procedures))
        .expect("analysis run")
}

/// Sorted defect kinds reported in `procedure`
pub fn defect_kinds(report: &AnalysisReport, procedure: &str) -> Vec<ErrorKind> {
    let mut kinds: Vec<ErrorKind> = report.defects_in(procedure).map(|d| d.kind).collect();
    kinds.sort();
    kinds
}

/// Straight-line procedure
pub fn straight(name: &str, formals: &[&str], body: Vec<Instr>) -> ProcedureDesc {
    formals
        .iter()
        .fold(ProcedureBuilder::new(name), |b, f| b.formal(f))
        .body(body)
        .build()
        .expect("well-formed procedure")
}

/// `x->field = x->field + 1`
pub fn incr() -> ProcedureDesc {
    straight(
        "incr",
        &["x"],
        vec![
            Instr::load("t", "x", "field"),
            Instr::store("x", "field", Expr::var("t").offset(1)),
        ],
    )
}

/// `free(x)`
pub fn release() -> ProcedureDesc {
    straight("release", &["x"], vec![Instr::free("x")])
}

/// Branch on `var == k`: `then_` on node 3, `else_` on node 4
pub fn branch_on(
    name: &str,
    prefix: Vec<Instr>,
    var: &str,
    k: i64,
    then_: Vec<Instr>,
    else_: Vec<Instr>,
) -> ProcedureDesc {
    let guard = |true_branch| Instr::Prune {
        cond: Cond::new(
            codegraph_biabduction::shared::models::CmpOp::Eq,
            Expr::var(var),
            Expr::Int(k),
        ),
        true_branch,
    };
    let mut then_instrs = vec![guard(true)];
    then_instrs.extend(then_);
    let mut else_instrs = vec![guard(false)];
    else_instrs.extend(else_);
    ProcedureBuilder::new(name)
        .node(2, NodeKind::Statement, prefix, vec![3, 4])
        .node(3, NodeKind::Prune, then_instrs, vec![EXIT_NODE])
        .node(4, NodeKind::Prune, else_instrs, vec![EXIT_NODE])
        .build()
        .expect("well-formed procedure")
}
