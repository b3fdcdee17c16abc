//! Stack storage outliving its scope

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::features::heap::ValidityTag;
use codegraph_biabduction::shared::models::{Capture, Expr, Instr, ProcedureBuilder, Storage};
use codegraph_biabduction::{AnalysisReport, ErrorKind};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

/// No Ok post holds stack storage: exited scopes are checked at exit and
/// the rest is dropped with the frame
fn assert_no_stack_in_ok_posts(report: &AnalysisReport) {
    for (id, summary) in &report.summaries {
        for spec in summary.ok_specs() {
            let dead = spec.post.dead_stack_among(spec.post.cells.keys());
            assert!(dead.is_empty(), "{}: exited stack cells {:?} in an Ok post", id, dead);
            let live: Vec<_> = spec
                .post
                .cells
                .iter()
                .filter(|(_, c)| matches!(c.validity, ValidityTag::StackLocal(_)))
                .map(|(loc, _)| *loc)
                .collect();
            assert!(live.is_empty(), "{}: stack cells {:?} in an Ok post", id, live);
        }
    }
}

fn scoped_local(name: &str) -> ProcedureBuilder {
    ProcedureBuilder::new(name).local("x", Storage::Stack { scope: 1 })
}

#[test]
fn test_returning_address_of_local() {
    let report = analyze(vec![straight(
        "f",
        &[],
        vec![Instr::address_of("p", "x"), Instr::ret(Some(Expr::var("p")))],
    )]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::DanglingReference]);
    assert_eq!(report.summary("f").unwrap().ok_specs().count(), 0);
}

#[test]
fn test_returning_address_of_static() {
    let proc = ProcedureBuilder::new("f")
        .local("g", Storage::Static)
        .body(vec![Instr::address_of("p", "g"), Instr::ret(Some(Expr::var("p")))])
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert!(defect_kinds(&report, "f").is_empty());
}

#[test]
fn test_local_address_stored_through_formal() {
    let proc = scoped_local("f")
        .formal("out")
        .body(vec![
            Instr::EnterScope { scope: 1 },
            Instr::address_of("p", "x"),
            Instr::store("out", "slot", Expr::var("p")),
            Instr::ExitScope { scope: 1 },
        ])
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::DanglingReference]);
    assert_eq!(report.summary("f").unwrap().ok_specs().count(), 0);
}

#[test]
fn test_by_ref_closure_invoked_after_scope() {
    let proc = scoped_local("f")
        .body(vec![
            Instr::EnterScope { scope: 1 },
            Instr::CaptureClosure {
                dst: "c".into(),
                captures: vec![Capture::by_ref("x")],
            },
            Instr::ExitScope { scope: 1 },
            Instr::InvokeClosure {
                dst: None,
                closure: "c".into(),
            },
        ])
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::UseAfterScope]);
}

#[test]
fn test_by_value_closure_invoked_after_scope() {
    let proc = scoped_local("f")
        .body(vec![
            Instr::EnterScope { scope: 1 },
            Instr::assign("x", Expr::Int(4)),
            Instr::CaptureClosure {
                dst: "c".into(),
                captures: vec![Capture::by_value("x")],
            },
            Instr::ExitScope { scope: 1 },
            Instr::InvokeClosure {
                dst: Some("r".into()),
                closure: "c".into(),
            },
        ])
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert!(defect_kinds(&report, "f").is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Stack storage never survives into an Ok post
// ═══════════════════════════════════════════════════════════════════════════

fn in_scope_strategy() -> impl Strategy<Value = Instr> {
    (0u8..6).prop_map(|op| match op {
        0 => Instr::address_of("p", "x"),
        1 => Instr::store("out", "slot", Expr::var("p")),
        2 => Instr::assign("r", Expr::var("p")),
        3 => Instr::CaptureClosure {
            dst: "c".into(),
            captures: vec![Capture::by_ref("x")],
        },
        4 => Instr::CaptureClosure {
            dst: "c".into(),
            captures: vec![Capture::by_value("x")],
        },
        _ => Instr::assign("x", Expr::Int(1)),
    })
}

fn after_scope_strategy() -> impl Strategy<Value = Vec<Instr>> {
    (any::<bool>(), any::<bool>()).prop_map(|(invoke, ret)| {
        let mut tail = Vec::new();
        if invoke {
            tail.push(Instr::InvokeClosure {
                dst: None,
                closure: "c".into(),
            });
        }
        if ret {
            tail.push(Instr::ret(Some(Expr::var("r"))));
        }
        tail
    })
}

#[test]
fn test_escape_programs_leave_no_stack_in_ok_posts() {
    let stored = scoped_local("stored")
        .formal("out")
        .body(vec![
            Instr::EnterScope { scope: 1 },
            Instr::address_of("p", "x"),
            Instr::store("out", "slot", Expr::var("p")),
            Instr::ExitScope { scope: 1 },
        ])
        .build()
        .unwrap();
    let by_value = scoped_local("by_value")
        .body(vec![
            Instr::EnterScope { scope: 1 },
            Instr::CaptureClosure {
                dst: "c".into(),
                captures: vec![Capture::by_value("x")],
            },
            Instr::ExitScope { scope: 1 },
            Instr::ret(Some(Expr::var("c"))),
        ])
        .build()
        .unwrap();
    let report = analyze(vec![stored, by_value]);
    assert!(report.summary("by_value").unwrap().ok_specs().count() > 0);
    assert_no_stack_in_ok_posts(&report);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ok_posts_hold_no_exited_stack(
        inside in prop::collection::vec(in_scope_strategy(), 1..6),
        tail in after_scope_strategy(),
    ) {
        let mut body = vec![Instr::EnterScope { scope: 1 }];
        body.extend(inside);
        body.push(Instr::ExitScope { scope: 1 });
        body.extend(tail);
        let proc = scoped_local("gen").formal("out").body(body).build().unwrap();
        let report = analyze(vec![proc]);
        assert_no_stack_in_ok_posts(&report);
    }
}
