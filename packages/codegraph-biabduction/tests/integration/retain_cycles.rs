//! Strong ownership cycles between reference-counted objects

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::shared::models::{Capture, Expr, Instr, ProcedureBuilder, Strength};
use codegraph_biabduction::ErrorKind;
use pretty_assertions::assert_eq;

fn own(owner: &str, target: &str, strength: Strength) -> Instr {
    Instr::OwnershipAssign {
        owner: owner.into(),
        field: "link".into(),
        target: Expr::var(target),
        strength,
    }
}

/// a → b → c → a with the given strength on the closing edge
fn triangle(closing: Strength) -> Vec<Instr> {
    vec![
        Instr::alloc("a"),
        Instr::alloc("b"),
        Instr::alloc("c"),
        own("a", "b", Strength::Strong),
        own("b", "c", Strength::Strong),
        own("c", "a", closing),
    ]
}

#[test]
fn test_strong_triangle_reported() {
    let report = analyze(vec![straight("cycle", &[], triangle(Strength::Strong))]);
    assert_eq!(defect_kinds(&report, "cycle"), vec![ErrorKind::RetainCycle]);
    let defect = report.defects_in("cycle").next().unwrap();
    assert_eq!(defect.locations.len(), 3);
}

#[test]
fn test_weak_edge_breaks_cycle() {
    let report = analyze(vec![straight("cycle", &[], triangle(Strength::Weak))]);
    assert!(defect_kinds(&report, "cycle").is_empty());
}

#[test]
fn test_detection_can_be_disabled() {
    let report = analyze_with(
        sequential().detect_retain_cycles(false),
        vec![straight("cycle", &[], triangle(Strength::Strong))],
    );
    assert!(!report.has_defects());
}

#[test]
fn test_cycle_reported_once_across_callers() {
    let caller = straight("caller", &[], vec![Instr::call(None, "cycle", vec![])]);
    let report = analyze(vec![
        caller,
        straight("cycle", &[], triangle(Strength::Strong)),
    ]);
    assert_eq!(report.defects_of_kind(ErrorKind::RetainCycle).count(), 1);
}

/// `obj.cb = closure[=obj]` with the given strength on `cb`
fn self_capture(cb: Strength) -> Vec<Instr> {
    vec![
        Instr::alloc("obj"),
        Instr::CaptureClosure {
            dst: "c".into(),
            captures: vec![Capture::by_value("obj")],
        },
        Instr::OwnershipAssign {
            owner: "obj".into(),
            field: "cb".into(),
            target: Expr::var("c"),
            strength: cb,
        },
    ]
}

#[test]
fn test_by_value_capture_keeps_owner_alive() {
    let report = analyze(vec![straight("handler", &[], self_capture(Strength::Strong))]);
    assert_eq!(defect_kinds(&report, "handler"), vec![ErrorKind::RetainCycle]);

    let report = analyze(vec![straight("handler", &[], self_capture(Strength::Weak))]);
    assert!(defect_kinds(&report, "handler").is_empty());
}

#[test]
fn test_weak_captured_variable_breaks_closure_cycle() {
    let proc = ProcedureBuilder::new("handler")
        .weak_local("obj")
        .body(self_capture(Strength::Strong))
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert!(defect_kinds(&report, "handler").is_empty());
}
