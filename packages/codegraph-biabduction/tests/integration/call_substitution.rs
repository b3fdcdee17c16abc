//! Callee summaries applied at call sites

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::shared::models::{Expr, Instr};
use codegraph_biabduction::{ErrorKind, ProcedureDesc};
use pretty_assertions::assert_eq;

/// Allocate `p` with `field = 10`, pass it to `callee`, read the field back
fn setup_and_call(callee: &str) -> Vec<Instr> {
    vec![
        Instr::alloc("p"),
        Instr::store("p", "field", Expr::Int(10)),
        Instr::call(None, callee, vec![Expr::var("p")]),
        Instr::load("v", "p", "field"),
    ]
}

fn double_free_p() -> Vec<Instr> {
    vec![Instr::free("p"), Instr::free("p")]
}

#[test]
fn test_post_is_substituted_into_caller() {
    // the else branch is reachable only if v != 11 after the call
    let main = branch_on("main", setup_and_call("incr"), "v", 11, vec![], double_free_p());
    let report = analyze(vec![main, incr()]);
    assert!(defect_kinds(&report, "main").is_empty());
    assert_eq!(report.summary("main").unwrap().ok_specs().count(), 1);
}

#[test]
fn test_stale_value_is_infeasible() {
    let main = branch_on("main", setup_and_call("incr"), "v", 10, vec![], double_free_p());
    let report = analyze(vec![main, incr()]);
    assert_eq!(defect_kinds(&report, "main"), vec![ErrorKind::DoubleFree]);
}

#[test]
fn test_footprint_propagates_through_wrapper() {
    let wrapper = straight(
        "wrapper",
        &["x"],
        vec![Instr::call(None, "incr", vec![Expr::var("x")])],
    );
    let main = branch_on("main", setup_and_call("wrapper"), "v", 11, vec![], double_free_p());
    let report = analyze(vec![main, wrapper, incr()]);

    let wrapper_spec = &report.summary("wrapper").unwrap().specs[0];
    assert!(wrapper_spec
        .pre
        .cells
        .values()
        .any(|c| c.fields.contains_key("field")));
    assert!(defect_kinds(&report, "main").is_empty());
}

#[test]
fn test_freed_argument_is_use_after_free() {
    let main = straight(
        "main",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::free("p"),
            Instr::call(None, "incr", vec![Expr::var("p")]),
        ],
    );
    let report = analyze(vec![main, incr()]);
    assert_eq!(defect_kinds(&report, "main"), vec![ErrorKind::UseAfterFree]);
}

#[test]
fn test_releasing_twice_through_callee() {
    let main = straight(
        "main",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::call(None, "release", vec![Expr::var("p")]),
            Instr::call(None, "release", vec![Expr::var("p")]),
        ],
    );
    let report = analyze(vec![main, release()]);
    assert_eq!(defect_kinds(&report, "main"), vec![ErrorKind::DoubleFree]);
    assert!(defect_kinds(&report, "release").is_empty());
}

#[test]
fn test_null_argument() {
    let main = straight("main", &[], vec![Instr::call(None, "incr", vec![Expr::Null])]);
    let report = analyze(vec![main, incr()]);
    assert_eq!(defect_kinds(&report, "main"), vec![ErrorKind::NullDeref]);
}

#[test]
fn test_unknown_callee_leaves_frame_alone() {
    let main = straight(
        "main",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::call(Some("r"), "external", vec![Expr::var("p")]),
            Instr::free("p"),
        ],
    );
    let report = analyze(vec![main]);
    assert!(defect_kinds(&report, "main").is_empty());
    assert!(report.incomplete.is_empty());
}

/// `release2(a, b) { free(a); free(b) }`
fn release2() -> ProcedureDesc {
    straight("release2", &["a", "b"], vec![Instr::free("a"), Instr::free("b")])
}

#[test]
fn test_same_object_for_two_released_formals() {
    let aliased = straight(
        "aliased",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::call(None, "release2", vec![Expr::var("p"), Expr::var("p")]),
        ],
    );
    let distinct = straight(
        "distinct",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::alloc("q"),
            Instr::call(None, "release2", vec![Expr::var("p"), Expr::var("q")]),
        ],
    );
    let report = analyze(vec![aliased, distinct, release2()]);

    assert_eq!(defect_kinds(&report, "aliased"), vec![ErrorKind::DoubleFree]);
    assert!(defect_kinds(&report, "distinct").is_empty());
    assert!(defect_kinds(&report, "release2").is_empty());
}

#[test]
fn test_call_abductions_share_one_budget_per_path() {
    let two = straight(
        "two",
        &["x", "y"],
        vec![
            Instr::call(None, "incr", vec![Expr::var("x")]),
            Instr::call(None, "incr", vec![Expr::var("y")]),
        ],
    );
    let report = analyze_with(sequential().abduction_depth(2), vec![two, incr()]);

    let summary = report.summary("two").unwrap();
    for spec in summary.ok_specs() {
        let with_field = spec
            .pre
            .cells
            .values()
            .filter(|c| c.fields.contains_key("field"))
            .count();
        assert!(with_field <= 1, "{} cells abduced past the budget", with_field);
    }
}
