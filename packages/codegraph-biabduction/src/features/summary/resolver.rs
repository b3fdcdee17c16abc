//! Call-site instantiation of callee summaries
//!
//! ```text
//! caller ⊢ pre(spec)[formals := args] * frame        (subtract)
//! caller' = frame * post(spec)[formals := args, existentials := fresh]
//! ```
//! Each Ok spec whose precondition the caller satisfies yields one
//! continuation. When a spec needs a resource the caller does not have,
//! the resource is abduced (into the caller's own precondition if it is
//! footprint) and the match is retried. `abduction_depth` caps these
//! abduce-and-retry rounds across one path. A precondition that needs
//! something the caller has invalidated is a caller defect.

use crate::errors::Result;
use crate::features::biabduction::{unknown_spec, PathState, Spec, Summary};
use crate::features::heap::{
    subtract, Bindings, HeapCell, LocOrigin, MatchFailure, PureAtom, Sym, SymbolicHeap,
    ValidityTag, Value,
};
use crate::features::interpreter::{Interpreter, StepOutcome};
use crate::shared::models::{ErrorKind, ProcedureId, Site};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct CallResolver<'i, 'a> {
    interp: &'i Interpreter<'a>,
}

/// Result of matching every Ok spec once
#[derive(Default)]
struct MatchRound {
    continuations: Vec<StepOutcome>,
    defect: Option<(ErrorKind, Option<Sym>)>,
    missing: Vec<(Sym, Option<String>)>,
}

impl<'i, 'a> CallResolver<'i, 'a> {
    pub fn new(interp: &'i Interpreter<'a>) -> Self {
        Self { interp }
    }

    /// Apply `callee`'s summary at `site` with actual arguments `args`
    pub fn resolve(
        &self,
        state: &PathState,
        callee: &ProcedureId,
        args: &[Value],
        ret: Option<&str>,
        site: Site,
    ) -> Result<Vec<StepOutcome>> {
        let summary = self
            .interp
            .lookup()
            .lookup(callee)
            .unwrap_or_else(|| Arc::new(Summary::unknown(callee.clone(), args.len(), "no summary")));

        let mut st = state.clone();
        let depth = self.interp.config().abduction_depth;
        loop {
            let round = self.match_specs(&st, &summary, args, ret, site);

            if let Some((kind, loc)) = round.defect {
                trace!(caller = %self.interp.procedure().id, %callee, %site, %kind, "callee precondition violated");
                let mut out = round.continuations;
                out.push(StepOutcome::error(st, kind, loc.into_iter().collect()));
                return Ok(out);
            }
            if !round.continuations.is_empty() {
                return Ok(round.continuations);
            }
            if round.missing.is_empty() {
                break;
            }
            if st.call_abductions >= depth {
                debug!(
                    caller = %self.interp.procedure().id,
                    %callee,
                    %site,
                    depth,
                    "abduction depth exhausted on this path"
                );
                break;
            }
            for (loc, field) in round.missing {
                self.abduce(&mut st, loc, field.as_deref(), site)?;
            }
            st.call_abductions += 1;
        }

        if summary.ok_specs().next().is_none() {
            // the callee never returns normally
            return Ok(Vec::new());
        }
        debug!(
            caller = %self.interp.procedure().id,
            %callee,
            %site,
            abductions = st.call_abductions,
            "no callee spec matched; applying unknown spec"
        );
        let spec = unknown_spec(args.len());
        let mut bindings = bind_formals(&spec, args);
        match subtract(&st.heap, &spec.pre, &mut bindings) {
            Ok(sub) => Ok(self
                .instantiate(&st, callee, &spec, sub.frame, sub.remainder, bindings, ret, site)
                .into_iter()
                .collect()),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn match_specs(&self, st: &PathState, summary: &Summary, args: &[Value], ret: Option<&str>, site: Site) -> MatchRound {
        let mut round = MatchRound::default();
        for spec in summary.ok_specs() {
            if spec.formals.len() != args.len() {
                continue;
            }
            let mut bindings = bind_formals(spec, args);
            match subtract(&st.heap, &spec.pre, &mut bindings) {
                Ok(sub) => {
                    round.continuations.extend(self.instantiate(
                        st,
                        &summary.procedure,
                        spec,
                        sub.frame,
                        sub.remainder,
                        bindings,
                        ret,
                        site,
                    ));
                }
                Err(MatchFailure::Defect {
                    kind,
                    loc,
                    footprint_loc,
                }) => {
                    if round.defect.is_none() && pre_consistent(st, spec, &bindings) {
                        round.defect = Some((refine_defect(spec, kind, footprint_loc), loc));
                    }
                }
                Err(MatchFailure::Missing { loc, field }) => {
                    if !round.missing.iter().any(|(l, f)| *l == loc && *f == field) {
                        round.missing.push((loc, field));
                    }
                }
                Err(MatchFailure::Alias { loc, first, second }) => {
                    if round.defect.is_none()
                        && frees_both(spec, first, second)
                        && pre_consistent(st, spec, &bindings)
                    {
                        round.defect = Some((ErrorKind::DoubleFree, Some(loc)));
                    }
                }
                Err(MatchFailure::Mismatch(_)) => {}
            }
        }
        round
    }

    /// Give the caller the resource a callee precondition asked for
    fn abduce(&self, st: &mut PathState, loc: Sym, field: Option<&str>, site: Site) -> Result<()> {
        match field {
            None if st.heap.cell(loc).is_some() => {}
            None if st.is_footprint(loc) => {
                self.interp
                    .guard(site, || format!("callee needs cell {} outside the precondition", loc))?;
                st.abduce_cell(loc);
            }
            None => st.materialize(loc),
            Some(f) => {
                if st.heap.cell(loc).is_some_and(|c| c.fields.contains_key(f)) {
                    return Ok(());
                }
                if st.pre.cell(loc).is_some() {
                    self.interp
                        .guard(site, || format!("callee needs {}.{} outside the precondition", loc, f))?;
                    st.abduce_field(loc, f);
                } else {
                    let v = Value::sym(st.fresh());
                    if let Some(cell) = st.heap.cell_mut(loc) {
                        cell.fields.insert(f.to_string(), v);
                    }
                }
            }
        }
        Ok(())
    }

    /// Caller state after the call under one matched spec
    #[allow(clippy::too_many_arguments)]
    fn instantiate(
        &self,
        st: &PathState,
        callee: &ProcedureId,
        spec: &Spec,
        frame: SymbolicHeap,
        remainder: Vec<PureAtom>,
        mut bindings: Bindings,
        ret: Option<&str>,
        site: Site,
    ) -> Option<StepOutcome> {
        let mut next = st.clone();
        next.heap = frame;
        for atom in remainder {
            if !next.assume(atom) {
                return None;
            }
        }

        let mut callee_syms: BTreeSet<Sym> = spec.post.syms();
        callee_syms.extend(spec.ret.and_then(|v| v.as_sym()));
        let mut fresh = BTreeSet::new();
        for s in callee_syms {
            if !bindings.contains_key(&s) {
                let f = next.fresh();
                bindings.insert(s, Value::sym(f));
                fresh.insert(f);
                let origin = spec.post.origins.get(&s).cloned().unwrap_or(LocOrigin::Returned {
                    callee: callee.clone(),
                    site,
                });
                next.heap.set_origin(f, origin);
            }
        }
        let mut map = |v: Value| v.map_sym(&mut |s| bindings.get(&s).copied().unwrap_or(Value::sym(s)));

        for (psym, pcell) in &spec.post.cells {
            let Some(target) = map(Value::sym(*psym)).as_loc() else {
                continue;
            };
            let loc = next.heap.resolve_loc(target);
            let mut cell = pcell.map_values(&mut map);
            if cell.validity == ValidityTag::Freed {
                cell.fields.clear();
                cell.ownership.clear();
            }
            match next.heap.cell_mut(loc) {
                Some(existing) if cell.validity != ValidityTag::Freed => {
                    existing.validity = cell.validity;
                    existing.destructed = cell.destructed;
                    existing.fields.extend(cell.fields);
                    existing.ownership.extend(cell.ownership);
                }
                _ => next.heap.insert_cell(loc, cell),
            }
        }
        for atom in spec.post.pure.iter() {
            next.heap.assume(atom.map_values(&mut map));
        }
        if !next.heap.is_feasible() {
            return None;
        }

        if let Some(name) = ret {
            let v = match spec.ret {
                Some(r) => map(r),
                None => {
                    let s = next.fresh();
                    next.heap.set_origin(
                        s,
                        LocOrigin::Returned {
                            callee: callee.clone(),
                            site,
                        },
                    );
                    Value::sym(s)
                }
            };
            self.interp.write_var(&mut next, name, v);
        }

        if spec.exceptional {
            next.exceptional = true;
            Some(StepOutcome::Throw(next))
        } else {
            Some(StepOutcome::Continue(next))
        }
    }
}

fn bind_formals(spec: &Spec, args: &[Value]) -> Bindings {
    spec.formals
        .iter()
        .zip(args)
        .filter_map(|(f, a)| f.as_loc().map(|s| (s, *a)))
        .collect()
}

/// The spec's pure precondition over bound symbols is consistent with the
/// caller; otherwise the violated spec describes a path the caller cannot
/// take. Non-nullness of the spec's own cells is what the defect is about,
/// so it is left out.
fn pre_consistent(st: &PathState, spec: &Spec, bindings: &Bindings) -> bool {
    let cell_not_null = |atom: &PureAtom| match *atom {
        PureAtom::Ne(a, b) => [(a, b), (b, a)].iter().any(|(x, y)| {
            y.is_null_const() && x.as_loc().is_some_and(|s| spec.pre.cell(s).is_some())
        }),
        _ => false,
    };
    let mut probe = st.heap.pure.clone();
    for atom in spec.pre.pure.iter() {
        if !cell_not_null(atom) && atom.syms().all(|s| bindings.contains_key(&s)) {
            probe.add(atom.map_values(&mut |v| {
                v.map_sym(&mut |s| bindings.get(&s).copied().unwrap_or(Value::sym(s)))
            }));
        }
    }
    probe.is_satisfiable()
}

/// A callee that frees a location the caller already freed is a double free
fn refine_defect(spec: &Spec, kind: ErrorKind, footprint_loc: Sym) -> ErrorKind {
    let frees = spec
        .post
        .cell(footprint_loc)
        .is_some_and(|c: &HeapCell| c.validity == ValidityTag::Freed);
    let required = spec
        .pre
        .cell(footprint_loc)
        .is_some_and(|c| c.validity != ValidityTag::Freed);
    if kind == ErrorKind::UseAfterFree && frees && required {
        ErrorKind::DoubleFree
    } else {
        kind
    }
}

/// The callee frees two cells it requires separately; handed one cell for
/// both, it frees that cell twice
fn frees_both(spec: &Spec, first: Sym, second: Sym) -> bool {
    [first, second].iter().all(|s| {
        spec.pre.cell(*s).is_some_and(|c| c.validity != ValidityTag::Freed)
            && spec.post.cell(*s).is_some_and(|c| c.validity == ValidityTag::Freed)
    })
}
