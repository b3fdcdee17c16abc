//! Bottom-up scheduling, recursion and failure isolation

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::shared::models::{
    Expr, Instr, NodeKind, ProcedureBuilder, ProcedureDesc, Program, EXIT_NODE,
};
use codegraph_biabduction::{ErrorKind, Scheduler, SummaryStatus};
use pretty_assertions::assert_eq;

fn forward(name: &str, callees: &[&str]) -> ProcedureDesc {
    let body = callees
        .iter()
        .map(|c| Instr::call(None, c, vec![Expr::var("x")]))
        .collect();
    straight(name, &["x"], body)
}

/// main → {left, right} → leaf
fn diamond_program() -> Program {
    Program::new(vec![
        forward("main", &["left", "right"]),
        forward("left", &["leaf"]),
        forward("right", &["leaf"]),
        straight("leaf", &["x"], vec![Instr::load("t", "x", "next")]),
    ])
}

fn position(order: &[codegraph_biabduction::ProcedureId], name: &str) -> usize {
    order
        .iter()
        .position(|p| p.as_str() == name)
        .unwrap_or_else(|| panic!("{} not scheduled", name))
}

#[test]
fn test_callees_finish_before_callers_sequential() {
    let outcome = Scheduler::new(sequential()).run(&diamond_program()).unwrap();
    let order = &outcome.order;
    assert_eq!(order.len(), 4);
    assert!(position(order, "leaf") < position(order, "left"));
    assert!(position(order, "leaf") < position(order, "right"));
    assert!(position(order, "left") < position(order, "main"));
    assert!(position(order, "right") < position(order, "main"));
}

#[test]
fn test_callees_finish_before_callers_parallel() {
    let outcome = Scheduler::new(sequential().worker_threads(4))
        .run(&diamond_program())
        .unwrap();
    let order = &outcome.order;
    assert_eq!(order.len(), 4);
    assert!(position(order, "leaf") < position(order, "left"));
    assert!(position(order, "left") < position(order, "main"));
    assert!(position(order, "right") < position(order, "main"));
    assert_eq!(outcome.summaries.len(), 4);
}

#[test]
fn test_parallel_matches_sequential() {
    let seq = Scheduler::new(sequential()).run(&diamond_program()).unwrap();
    let par = Scheduler::new(sequential().worker_threads(4))
        .run(&diamond_program())
        .unwrap();
    for (id, summary) in &seq.summaries {
        assert_eq!(
            summary.canonical_keys(),
            par.summaries[id].canonical_keys(),
            "summary of {} differs",
            id
        );
    }
}

#[test]
fn test_recursive_procedure_gets_summary() {
    let walk = straight(
        "walk",
        &["x"],
        vec![
            Instr::load("n", "x", "next"),
            Instr::call(None, "walk", vec![Expr::var("n")]),
        ],
    );
    let report = analyze(vec![walk, forward("main", &["walk"])]);
    let summary = report.summary("walk").unwrap();
    assert!(!summary.specs.is_empty());
    assert!(report.summary("main").is_some());
}

#[test]
fn test_mutual_recursion_is_one_scc() {
    let outcome = Scheduler::new(sequential())
        .run(&Program::new(vec![
            forward("ping", &["pong"]),
            forward("pong", &["ping"]),
            forward("main", &["ping"]),
        ]))
        .unwrap();
    assert_eq!(outcome.scc_count, 2);
    assert!(position(&outcome.order, "ping") < position(&outcome.order, "main"));
}

#[test]
fn test_unsupported_instruction_is_isolated() {
    let broken = straight(
        "broken",
        &["x"],
        vec![Instr::Unsupported {
            description: "calli".into(),
        }],
    );
    let main = straight(
        "main",
        &["x"],
        vec![
            Instr::call(None, "broken", vec![Expr::var("x")]),
            Instr::free("x"),
            Instr::free("x"),
        ],
    );
    let report = analyze(vec![broken, main]);

    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].procedure.as_str(), "broken");
    assert_eq!(report.incomplete[0].kind, ErrorKind::AnalysisIncomplete);
    assert!(matches!(
        report.summary("broken").unwrap().status,
        SummaryStatus::Unknown { .. }
    ));
    // the caller still runs against the conservative summary
    assert_eq!(defect_kinds(&report, "main"), vec![ErrorKind::DoubleFree]);
}

#[test]
fn test_path_budget_marks_incomplete() {
    // every node closes its null branch with a defect and continues
    let mut builder = ProcedureBuilder::new("wide");
    for id in 2..9 {
        let next = if id == 8 { EXIT_NODE } else { id + 1 };
        builder = builder.node(
            id,
            NodeKind::Statement,
            vec![
                Instr::Alloc {
                    dst: "p".into(),
                    nullable: true,
                },
                Instr::store("p", "val", Expr::Int(1)),
            ],
            vec![next],
        );
    }
    let report = analyze_with(sequential().path_budget(4), vec![builder.build().unwrap()]);
    assert!(report.summary("wide").unwrap().is_incomplete());
    assert_eq!(report.incomplete.len(), 1);
}
