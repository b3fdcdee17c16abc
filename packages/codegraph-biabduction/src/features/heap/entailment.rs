//! Footprint subtraction (frame inference)
//!
//! ```text
//! state ⊢ footprint * ?frame      with bindings for footprint existentials
//! ```
//! `subtract` walks the footprint from its bound roots (usually the callee's
//! formals), matching each footprint cell against the state cell its root
//! is bound to. Matched fields are consumed; what remains of the state is
//! the frame. Pure footprint atoms that the state does not already entail
//! are returned as the remainder, to be assumed by the caller.
//!
//! Validity is checked before any field is matched: a footprint that needs
//! a location the state has freed (or nulled, or whose scope has exited) is
//! a defect, never an abduction opportunity.

use super::domain::{Sym, ValidityTag, Value};
use super::pure::PureAtom;
use super::symbolic_heap::SymbolicHeap;
use crate::shared::models::ErrorKind;
use std::collections::{BTreeMap, BTreeSet};

/// Footprint symbol → state value
pub type Bindings = BTreeMap<Sym, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtraction {
    /// State minus the consumed resources
    pub frame: SymbolicHeap,
    /// Footprint atoms (in state vocabulary) not entailed by the state
    pub remainder: Vec<PureAtom>,
    /// State cells the footprint matched
    pub consumed: BTreeSet<Sym>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    /// Resource absent from the state; `field: None` means the whole cell
    Missing { loc: Sym, field: Option<String> },
    /// Footprint needs a location the state has invalidated; `footprint_loc`
    /// is the footprint cell that asked for it
    Defect {
        kind: ErrorKind,
        loc: Option<Sym>,
        footprint_loc: Sym,
    },
    /// Two footprint cells bound to the same state cell; the footprint
    /// separates them, so the state cannot supply both
    Alias {
        loc: Sym,
        first: Sym,
        second: Sym,
    },
    /// Footprint contradicts the state
    Mismatch(String),
}

/// Remove `footprint` from `state`
///
/// `bindings` must bind the footprint's root symbols; it is extended with
/// every existential the match instantiates.
pub fn subtract(
    state: &SymbolicHeap,
    footprint: &SymbolicHeap,
    bindings: &mut Bindings,
) -> Result<Subtraction, MatchFailure> {
    let mut out = Subtraction {
        frame: state.clone(),
        remainder: Vec::new(),
        consumed: BTreeSet::new(),
    };
    let mut missing: Option<MatchFailure> = None;
    let mut claimed: BTreeMap<Sym, Sym> = BTreeMap::new();
    let mut pending: BTreeSet<Sym> = footprint.cells.keys().copied().collect();

    loop {
        let ready: Vec<Sym> = pending
            .iter()
            .filter(|s| bindings.contains_key(s))
            .copied()
            .collect();
        if ready.is_empty() {
            break;
        }
        for fsym in ready {
            pending.remove(&fsym);
            let bound = bindings[&fsym];
            match match_cell(state, footprint, fsym, bound, bindings, &mut claimed, &mut out) {
                Ok(()) => {}
                Err(MatchFailure::Missing { loc, field }) => {
                    missing.get_or_insert(MatchFailure::Missing { loc, field });
                }
                Err(other) => return Err(other),
            }
        }
    }

    if let Some(m) = missing {
        return Err(m);
    }

    let mut map = |v: Value| v.map_sym(&mut |s| bindings.get(&s).copied().unwrap_or(Value::sym(s)));
    for atom in footprint.pure.iter() {
        // atoms over unmatched existentials constrain nothing in the state
        if !atom.syms().all(|s| bindings.contains_key(&s)) {
            continue;
        }
        let mapped = atom.map_values(&mut map);
        check_atom(state, mapped, &mut out)?;
    }

    Ok(out)
}

fn match_cell(
    state: &SymbolicHeap,
    footprint: &SymbolicHeap,
    fsym: Sym,
    bound: Value,
    bindings: &mut Bindings,
    claimed: &mut BTreeMap<Sym, Sym>,
    out: &mut Subtraction,
) -> Result<(), MatchFailure> {
    let Some(fcell) = footprint.cell(fsym) else {
        return Ok(());
    };

    if bound.is_null_const() || state.pure.entails_null(bound) {
        if fcell.validity == ValidityTag::Null {
            return Ok(());
        }
        return Err(MatchFailure::Defect {
            kind: ErrorKind::NullDeref,
            loc: bound.as_sym(),
            footprint_loc: fsym,
        });
    }
    let Some(loc) = bound.as_loc() else {
        return Err(MatchFailure::Mismatch(format!(
            "footprint cell {} bound to non-location {}",
            fsym, bound
        )));
    };
    let loc = state.resolve_loc(loc);
    let Some(scell) = state.cell(loc) else {
        return Err(MatchFailure::Missing { loc, field: None });
    };
    match claimed.get(&loc) {
        Some(&first) if first != fsym => {
            return Err(MatchFailure::Alias {
                loc,
                first,
                second: fsym,
            })
        }
        _ => {
            claimed.insert(loc, fsym);
        }
    }

    let defect = |kind| MatchFailure::Defect {
        kind,
        loc: Some(loc),
        footprint_loc: fsym,
    };
    match (scell.validity, fcell.validity) {
        (ValidityTag::Freed, ValidityTag::Freed) => {}
        (ValidityTag::Freed, _) | (_, ValidityTag::Freed) => {
            return Err(defect(ErrorKind::UseAfterFree))
        }
        (ValidityTag::Null, ValidityTag::Null) => {}
        (ValidityTag::Null, _) => return Err(defect(ErrorKind::NullDeref)),
        (ValidityTag::StackLocal(s), _) if state.exited_scopes.contains(&s) => {
            return Err(defect(ErrorKind::UseAfterScope))
        }
        _ => {}
    }
    if scell.destructed && !fcell.destructed && !fcell.fields.is_empty() {
        return Err(defect(ErrorKind::UseAfterDestructor));
    }

    for (field, fval) in &fcell.fields {
        let Some(sval) = scell.fields.get(field) else {
            return Err(MatchFailure::Missing {
                loc,
                field: Some(field.clone()),
            });
        };
        unify(state, *fval, *sval, bindings, out)?;
        if let Some(frame_cell) = out.frame.cell_mut(loc) {
            frame_cell.fields.remove(field);
        }
    }
    out.consumed.insert(loc);
    Ok(())
}

/// Match footprint value `fval` against state value `sval`
fn unify(
    state: &SymbolicHeap,
    fval: Value,
    sval: Value,
    bindings: &mut Bindings,
    out: &mut Subtraction,
) -> Result<(), MatchFailure> {
    let expected = match fval {
        Value::Sym { sym, offset } => match bindings.get(&sym) {
            Some(b) => b.add(offset),
            None => {
                let Some(back) = offset.checked_neg().and_then(|k| sval.checked_add(k)) else {
                    return Err(MatchFailure::Mismatch(format!("{} out of offset range", sval)));
                };
                bindings.insert(sym, back);
                return Ok(());
            }
        },
        constant => constant,
    };
    check_atom(state, PureAtom::eq(expected, sval), out)
}

fn check_atom(state: &SymbolicHeap, atom: PureAtom, out: &mut Subtraction) -> Result<(), MatchFailure> {
    if state.pure.entails(&atom) {
        return Ok(());
    }
    let mut probe = state.pure.clone();
    probe.add(atom);
    out.remainder.iter().for_each(|a| probe.add(*a));
    if !probe.is_satisfiable() {
        return Err(MatchFailure::Mismatch(format!("state contradicts {}", atom)));
    }
    out.remainder.push(atom);
    Ok(())
}
