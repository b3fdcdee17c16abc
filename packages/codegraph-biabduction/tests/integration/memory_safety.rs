//! Memory-safety defects inside a single procedure
//!
//! Double free, use-after-free, null dereference of unchecked allocations
//! and destructor lifecycle, end-to-end through `AnalysisService`.

#[path = "../common/mod.rs"]
mod common;
use common::*;

use codegraph_biabduction::shared::models::{Cond, Expr, Instr, NodeKind, ProcedureBuilder, EXIT_NODE};
use codegraph_biabduction::ErrorKind;
use pretty_assertions::assert_eq;

// ═══════════════════════════════════════════════════════════════════════════
// Heap release
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_double_free_reported_once() {
    let report = analyze(vec![straight("f", &["x"], vec![Instr::free("x"), Instr::free("x")])]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::DoubleFree]);

    let defect = report.defects_in("f").next().unwrap();
    assert_eq!(defect.trace.len(), 2);
    assert_eq!(defect.locations.len(), 1);
}

#[test]
fn test_free_new_free_is_clean() {
    let report = analyze(vec![straight(
        "f",
        &["x"],
        vec![Instr::free("x"), Instr::alloc("x"), Instr::free("x")],
    )]);
    assert!(defect_kinds(&report, "f").is_empty());
    assert_eq!(report.summary("f").unwrap().ok_specs().count(), 1);
}

#[test]
fn test_use_after_free() {
    let report = analyze(vec![straight(
        "f",
        &[],
        vec![
            Instr::alloc("p"),
            Instr::free("p"),
            Instr::store("p", "val", Expr::Int(1)),
        ],
    )]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::UseAfterFree]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Null
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_unchecked_nullable_allocation() {
    let report = analyze(vec![straight(
        "f",
        &[],
        vec![
            Instr::Alloc {
                dst: "p".into(),
                nullable: true,
            },
            Instr::store("p", "val", Expr::Int(1)),
        ],
    )]);
    assert_eq!(defect_kinds(&report, "f"), vec![ErrorKind::NullDeref]);
}

#[test]
fn test_checked_nullable_allocation_is_clean() {
    let is_null = |true_branch| Instr::Prune {
        cond: Cond::is_null("p"),
        true_branch,
    };
    let proc = ProcedureBuilder::new("f")
        .node(
            2,
            NodeKind::Statement,
            vec![Instr::Alloc {
                dst: "p".into(),
                nullable: true,
            }],
            vec![3, 4],
        )
        .node(3, NodeKind::Prune, vec![is_null(true), Instr::ret(None)], vec![EXIT_NODE])
        .node(
            4,
            NodeKind::Prune,
            vec![is_null(false), Instr::store("p", "val", Expr::Int(1))],
            vec![EXIT_NODE],
        )
        .build()
        .unwrap();
    let report = analyze(vec![proc]);
    assert!(defect_kinds(&report, "f").is_empty());
    assert_eq!(report.summary("f").unwrap().ok_specs().count(), 2);
}

#[test]
fn test_formal_dereference_is_abduced_not_reported() {
    let report = analyze(vec![straight("f", &["x"], vec![Instr::load("t", "x", "next")])]);
    assert!(defect_kinds(&report, "f").is_empty());
    let spec = &report.summary("f").unwrap().specs[0];
    assert_eq!(spec.pre.cells.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Destructors
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_destructor_lifecycle() {
    let destruct = || Instr::Destructor { var: "o".into() };
    let report = analyze(vec![
        straight("twice", &[], vec![Instr::alloc("o"), destruct(), destruct()]),
        straight(
            "use_after",
            &[],
            vec![Instr::alloc("o"), destruct(), Instr::load("t", "o", "f")],
        ),
        straight(
            "reconstructed",
            &[],
            vec![
                Instr::alloc("o"),
                destruct(),
                Instr::Construct { var: "o".into() },
                Instr::load("t", "o", "f"),
                destruct(),
            ],
        ),
    ]);
    assert_eq!(defect_kinds(&report, "twice"), vec![ErrorKind::DoubleDestruct]);
    assert_eq!(defect_kinds(&report, "use_after"), vec![ErrorKind::UseAfterDestructor]);
    assert!(defect_kinds(&report, "reconstructed").is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Arithmetic
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_overflowing_branch_is_dropped_not_crashed() {
    let proc = branch_on(
        "wrap",
        vec![],
        "flag",
        0,
        vec![
            Instr::assign("i", Expr::Int(i64::MAX)),
            Instr::assign("i", Expr::var("i").offset(1)),
        ],
        vec![],
    );
    let report = analyze(vec![proc]);

    let summary = report.summary("wrap").unwrap();
    assert_eq!(summary.ok_specs().count(), 1);
    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].reason, "integer overflow");
}
