//! Re-analysis stability and witness replay
//!
//! Summaries are compared through their canonical keys, which are invariant
//! under symbol renaming.

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::shared::models::{Expr, Instr, ProcedureDesc};
use codegraph_biabduction::{AnalysisReport, Engine, ProcedureId, Summary};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn keys(report: &AnalysisReport) -> BTreeMap<ProcedureId, Vec<String>> {
    report
        .summaries
        .iter()
        .map(|(id, s)| (id.clone(), s.canonical_keys()))
        .collect()
}

fn sample_program() -> Vec<ProcedureDesc> {
    let main = branch_on(
        "main",
        vec![
            Instr::alloc("p"),
            Instr::store("p", "field", Expr::Int(10)),
            Instr::call(None, "incr", vec![Expr::var("p")]),
            Instr::load("v", "p", "field"),
        ],
        "v",
        11,
        vec![Instr::call(None, "release", vec![Expr::var("p")])],
        vec![Instr::free("p"), Instr::free("p")],
    );
    let shuffle = straight(
        "shuffle",
        &["a", "b"],
        vec![
            Instr::load("t", "a", "next"),
            Instr::store("b", "next", Expr::var("t")),
            Instr::free("a"),
        ],
    );
    vec![main, incr(), release(), shuffle]
}

#[test]
fn test_reanalysis_is_idempotent() {
    let first = analyze(sample_program());
    let second = analyze(sample_program());
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first.defects, second.defects);
}

#[test]
fn test_thread_count_does_not_change_summaries() {
    let seq = analyze(sample_program());
    let par = analyze_with(sequential().worker_threads(4), sample_program());
    assert_eq!(keys(&seq), keys(&par));
}

#[test]
fn test_every_spec_replays() {
    let program = sample_program();
    let report = analyze(program.clone());
    let lookup: BTreeMap<ProcedureId, Arc<Summary>> = report
        .summaries
        .iter()
        .map(|(id, s)| (id.clone(), Arc::new(s.clone())))
        .collect();
    let engine = Engine::new(sequential());

    for proc in &program {
        let summary = &report.summaries[&proc.id];
        for spec in &summary.specs {
            let result = engine.replay(proc, spec, &lookup).unwrap();
            assert!(
                result.reproduced,
                "{}: spec ending in {} did not replay",
                proc.id,
                spec.outcome
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Properties over generated straight-line procedures
// ═══════════════════════════════════════════════════════════════════════════

fn instr_strategy() -> impl Strategy<Value = Instr> {
    let var = prop_oneof![Just("a"), Just("b"), Just("c")];
    (0u8..5, var.clone(), var).prop_map(|(op, x, y)| match op {
        0 => Instr::alloc(x),
        1 => Instr::free(x),
        2 => Instr::load(x, y, "next"),
        3 => Instr::store(x, "next", Expr::var(y)),
        _ => Instr::assign(x, Expr::var(y)),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_reanalysis_is_idempotent(body in prop::collection::vec(instr_strategy(), 1..8)) {
        let procs = || vec![straight("gen", &["a", "b"], body.clone())];
        let first = analyze(procs());
        let second = analyze(procs());
        prop_assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn prop_generated_specs_replay(body in prop::collection::vec(instr_strategy(), 1..8)) {
        let proc = straight("gen", &["a", "b"], body);
        let report = analyze(vec![proc.clone()]);
        let engine = Engine::new(sequential());
        let lookup: BTreeMap<ProcedureId, Arc<Summary>> = BTreeMap::new();
        for spec in &report.summaries[&proc.id].specs {
            let result = engine.replay(&proc, spec, &lookup).unwrap();
            prop_assert!(result.reproduced);
        }
    }
}
