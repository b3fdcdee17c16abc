//! Transfer functions

use super::outcome::StepOutcome;
use crate::config::EngineConfig;
use crate::errors::{AnalysisError, Result};
use crate::features::biabduction::PathState;
use crate::features::heap::{HeapCell, LocOrigin, OwnershipEdge, PureAtom, Sym, ValidityTag, Value};
use crate::features::summary::{CallResolver, SummaryLookup};
use crate::shared::models::{
    Capture, CaptureMode, Cond, ErrorKind, Expr, Instr, Instruction, ProcedureDesc, ScopeId, Site,
    Storage, Strength,
};
use tracing::trace;

/// Field holding the value of an addressed variable
pub(crate) const SLOT_FIELD: &str = "*";

/// Whether missing footprint may be abduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbductionMode {
    Enabled,
    /// Replay: the precondition is fixed, needing more is divergence
    Disabled,
}

/// Result of dereferencing a value
enum Access {
    Loc(Sym),
    Defect(ErrorKind, Option<Sym>),
    Abandon(String),
}

pub struct Interpreter<'a> {
    proc: &'a ProcedureDesc,
    lookup: &'a dyn SummaryLookup,
    config: &'a EngineConfig,
    mode: AbductionMode,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        proc: &'a ProcedureDesc,
        lookup: &'a dyn SummaryLookup,
        config: &'a EngineConfig,
        mode: AbductionMode,
    ) -> Self {
        Self {
            proc,
            lookup,
            config,
            mode,
        }
    }

    pub fn procedure(&self) -> &'a ProcedureDesc {
        self.proc
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    pub fn mode(&self) -> AbductionMode {
        self.mode
    }

    /// Interpret one instruction
    pub fn step(&self, state: &PathState, instruction: &Instruction, site: Site) -> Result<Vec<StepOutcome>> {
        let mut st = state.clone();
        st.trace.push(site);

        let outcomes = match &instruction.instr {
            Instr::Assign { dst, value } => match self.eval(&mut st, value) {
                Some(v) => {
                    self.write_var(&mut st, dst, v);
                    vec![StepOutcome::Continue(st)]
                }
                None => vec![Self::overflow(st)],
            },
            Instr::Load { dst, base, field } => self.exec_load(st, dst, base, field, site)?,
            Instr::Store { base, field, value } => self.exec_store(st, base, field, value, None, site)?,
            Instr::Alloc { dst, nullable } => self.exec_alloc(st, dst, *nullable, site),
            Instr::Free { var } => self.exec_free(st, var, site)?,
            Instr::AddressOf { dst, local } => {
                let slot = self.ensure_slot(&mut st, local);
                self.write_var(&mut st, dst, Value::sym(slot));
                vec![StepOutcome::Continue(st)]
            }
            Instr::Call { ret, callee, args } => {
                let actuals: Option<Vec<Value>> = args.iter().map(|a| self.eval(&mut st, a)).collect();
                match actuals {
                    Some(actuals) => CallResolver::new(self).resolve(&st, callee, &actuals, ret.as_deref(), site)?,
                    None => vec![Self::overflow(st)],
                }
            }
            Instr::CaptureClosure { dst, captures } => self.exec_capture(st, dst, captures, site),
            Instr::InvokeClosure { dst, closure } => {
                self.exec_invoke(st, dst.as_deref(), closure, site)?
            }
            Instr::Destructor { var } => self.exec_destructor(st, var, site)?,
            Instr::Construct { var } => self.exec_construct(st, var, site)?,
            Instr::OwnershipAssign {
                owner,
                field,
                target,
                strength,
            } => self.exec_store(st, owner, field, target, Some(*strength), site)?,
            Instr::Prune { cond, true_branch } => self.exec_prune(st, cond, *true_branch),
            Instr::EnterScope { scope } => {
                st.enter_scope(*scope);
                vec![StepOutcome::Continue(st)]
            }
            Instr::ExitScope { scope } => vec![self.exec_exit_scope(st, *scope)],
            Instr::Return { value } => match value.as_ref().map(|e| self.eval(&mut st, e)) {
                Some(None) => vec![Self::overflow(st)],
                ret => {
                    st.ret = ret.flatten();
                    vec![self.exit_frame(st)]
                }
            },
            Instr::Throw { value } => match value.as_ref().map(|e| self.eval(&mut st, e)) {
                Some(None) => vec![Self::overflow(st)],
                ret => {
                    st.ret = ret.flatten();
                    st.exceptional = true;
                    vec![StepOutcome::Throw(st)]
                }
            },
            Instr::Unsupported { description } => {
                return Err(AnalysisError::UnsupportedInstruction {
                    site,
                    description: description.clone(),
                })
            }
        };
        Ok(outcomes)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Variables and expressions
    // ═══════════════════════════════════════════════════════════════════════

    /// `None` when constant arithmetic leaves the `i64` range
    pub(crate) fn eval(&self, st: &mut PathState, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Var(name) => Some(self.read_var(st, name)),
            Expr::Int(n) => Some(Value::Int(*n)),
            Expr::Null => Some(Value::Null),
            Expr::Offset(e, k) => self.eval(st, e)?.checked_add(*k),
        }
    }

    fn overflow(state: PathState) -> StepOutcome {
        StepOutcome::Abandon {
            state,
            reason: "integer overflow".to_string(),
        }
    }

    fn read_var(&self, st: &mut PathState, name: &str) -> Value {
        if let Some(&slot) = st.slots.get(name) {
            if let Some(v) = st.heap.cell(slot).and_then(|c| c.fields.get(SLOT_FIELD)) {
                return *v;
            }
            let v = Value::sym(st.fresh());
            if let Some(cell) = st.heap.cell_mut(slot) {
                cell.fields.insert(SLOT_FIELD.to_string(), v);
            }
            return v;
        }
        if let Some(v) = st.env.get(name) {
            return *v;
        }
        // uninitialized local or unmodeled global
        let v = Value::sym(st.fresh());
        st.env.insert(name.to_string(), v);
        v
    }

    pub(crate) fn write_var(&self, st: &mut PathState, name: &str, v: Value) {
        if let Some(&slot) = st.slots.get(name) {
            if let Some(cell) = st.heap.cell_mut(slot) {
                cell.fields.insert(SLOT_FIELD.to_string(), v);
                return;
            }
        }
        st.env.insert(name.to_string(), v);
    }

    /// Storage slot of `local`, created on first `&local`
    fn ensure_slot(&self, st: &mut PathState, local: &str) -> Sym {
        if let Some(&slot) = st.slots.get(local) {
            return slot;
        }
        let slot = st.fresh();
        let (validity, origin) = match self.proc.storage_of(local) {
            Storage::Static => {
                st.statics.insert(slot);
                (
                    ValidityTag::Allocated,
                    LocOrigin::Static {
                        name: local.to_string(),
                    },
                )
            }
            Storage::Stack { scope } => (
                ValidityTag::StackLocal(st.scope_instance(scope)),
                LocOrigin::Local {
                    name: local.to_string(),
                },
            ),
        };
        let mut cell = HeapCell::new(validity);
        if let Some(v) = st.env.remove(local) {
            cell.fields.insert(SLOT_FIELD.to_string(), v);
        }
        st.heap.insert_cell(slot, cell);
        st.heap.assume(PureAtom::ne(Value::sym(slot), Value::Null));
        st.heap.set_origin(slot, origin);
        st.slots.insert(local.to_string(), slot);
        slot
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Dereference and abduction
    // ═══════════════════════════════════════════════════════════════════════

    /// Fail when abduction is disabled
    pub(crate) fn guard(&self, site: Site, what: impl FnOnce() -> String) -> Result<()> {
        match self.mode {
            AbductionMode::Enabled => Ok(()),
            AbductionMode::Disabled => Err(AnalysisError::ReplayDiverged {
                site,
                reason: what(),
            }),
        }
    }

    /// Resolve `v` to a live location, abducing its cell if it is footprint
    fn access(&self, st: &mut PathState, v: Value, check_destructed: bool, site: Site) -> Result<Access> {
        if v.is_null_const() {
            return Ok(Access::Defect(ErrorKind::NullDeref, None));
        }
        let Some(base) = v.as_sym() else {
            return Ok(Access::Abandon(format!("dereference of constant {}", v)));
        };
        if st.heap.pure.entails_null(Value::sym(base)) {
            return Ok(Access::Defect(ErrorKind::NullDeref, Some(base)));
        }
        let loc = st.heap.resolve_loc(base);
        match st.heap.cell(loc) {
            Some(cell) => {
                let kind = match cell.validity {
                    ValidityTag::Freed => Some(ErrorKind::UseAfterFree),
                    ValidityTag::Null => Some(ErrorKind::NullDeref),
                    ValidityTag::StackLocal(s) if st.heap.exited_scopes.contains(&s) => {
                        Some(ErrorKind::UseAfterScope)
                    }
                    _ if check_destructed && cell.destructed => Some(ErrorKind::UseAfterDestructor),
                    _ => None,
                };
                Ok(match kind {
                    Some(k) => Access::Defect(k, Some(loc)),
                    None => Access::Loc(loc),
                })
            }
            None if st.is_footprint(loc) => {
                self.guard(site, || format!("precondition lacks cell {}", loc))?;
                trace!(procedure = %self.proc.id, %site, %loc, "abduce cell");
                st.abduce_cell(loc);
                Ok(Access::Loc(loc))
            }
            None => {
                st.materialize(loc);
                Ok(Access::Loc(loc))
            }
        }
    }

    /// Current value of `loc.field`, abducing it if the cell is footprint
    fn read_field(&self, st: &mut PathState, loc: Sym, field: &str, site: Site) -> Result<Value> {
        if let Some(v) = st.heap.cell(loc).and_then(|c| c.fields.get(field)) {
            return Ok(*v);
        }
        if st.pre.cell(loc).is_some() {
            self.guard(site, || format!("precondition lacks {}.{}", loc, field))?;
            trace!(procedure = %self.proc.id, %site, %loc, field, "abduce field");
            return Ok(st.abduce_field(loc, field));
        }
        let v = Value::sym(st.fresh());
        if let Some(cell) = st.heap.cell_mut(loc) {
            cell.fields.insert(field.to_string(), v);
        }
        Ok(v)
    }

    fn field_name(field: &str, base: Value) -> String {
        match base {
            Value::Sym { offset, .. } if offset != 0 => format!("{}[{}]", field, offset),
            _ => field.to_string(),
        }
    }

    fn defect_outcome(st: PathState, kind: ErrorKind, loc: Option<Sym>) -> StepOutcome {
        StepOutcome::error(st, kind, loc.into_iter().collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Memory
    // ═══════════════════════════════════════════════════════════════════════

    fn exec_load(&self, mut st: PathState, dst: &str, base: &str, field: &str, site: Site) -> Result<Vec<StepOutcome>> {
        let base_v = self.read_var(&mut st, base);
        let loc = match self.access(&mut st, base_v, true, site)? {
            Access::Loc(l) => l,
            Access::Defect(k, l) => return Ok(vec![Self::defect_outcome(st, k, l)]),
            Access::Abandon(reason) => return Ok(vec![StepOutcome::Abandon { state: st, reason }]),
        };
        let v = self.read_field(&mut st, loc, &Self::field_name(field, base_v), site)?;
        self.write_var(&mut st, dst, v);
        Ok(vec![StepOutcome::Continue(st)])
    }

    /// Store, or ownership assignment when `strength` is given
    fn exec_store(
        &self,
        mut st: PathState,
        base: &str,
        field: &str,
        value: &Expr,
        strength: Option<Strength>,
        site: Site,
    ) -> Result<Vec<StepOutcome>> {
        let base_v = self.read_var(&mut st, base);
        let loc = match self.access(&mut st, base_v, true, site)? {
            Access::Loc(l) => l,
            Access::Defect(k, l) => return Ok(vec![Self::defect_outcome(st, k, l)]),
            Access::Abandon(reason) => return Ok(vec![StepOutcome::Abandon { state: st, reason }]),
        };
        let Some(v) = self.eval(&mut st, value) else {
            return Ok(vec![Self::overflow(st)]);
        };
        if st.heap.is_dead_stack(v) {
            let target = v.as_sym().map(|s| st.heap.resolve_loc(s));
            let locs = std::iter::once(loc).chain(target).collect();
            return Ok(vec![StepOutcome::error(st, ErrorKind::DanglingReference, locs)]);
        }

        let field = Self::field_name(field, base_v);
        // the store needs the edge it overwrites
        let has_field = st.heap.cell(loc).is_some_and(|c| c.fields.contains_key(&field));
        if !has_field && st.pre.cell(loc).is_some_and(|c| !c.fields.contains_key(&field)) {
            self.read_field(&mut st, loc, &field, site)?;
        }

        if let Some(cell) = st.heap.cell_mut(loc) {
            cell.fields.insert(field.clone(), v);
            if let Some(strength) = strength {
                if v.is_null_const() {
                    cell.ownership.remove(&field);
                } else {
                    cell.ownership.insert(field, OwnershipEdge { target: v, strength });
                }
            }
        }
        Ok(vec![StepOutcome::Continue(st)])
    }

    fn exec_alloc(&self, st: PathState, dst: &str, nullable: bool, site: Site) -> Vec<StepOutcome> {
        let mut allocated = st.clone();
        let s = allocated.fresh();
        allocated.materialize(s);
        allocated.heap.set_origin(
            s,
            LocOrigin::Heap {
                procedure: self.proc.id.clone(),
                site,
            },
        );
        self.write_var(&mut allocated, dst, Value::sym(s));

        let mut outcomes = vec![StepOutcome::Continue(allocated)];
        if nullable {
            let mut null = st;
            self.write_var(&mut null, dst, Value::Null);
            outcomes.push(StepOutcome::Continue(null));
        }
        outcomes
    }

    fn exec_free(&self, mut st: PathState, var: &str, site: Site) -> Result<Vec<StepOutcome>> {
        let v = self.read_var(&mut st, var);
        if v.is_null_const() || st.heap.pure.entails_null(v) {
            return Ok(vec![StepOutcome::Continue(st)]);
        }
        let Some(base) = v.as_loc() else {
            let reason = format!("free of non-base pointer {}", v);
            return Ok(vec![StepOutcome::Abandon { state: st, reason }]);
        };
        let loc = st.heap.resolve_loc(base);
        match st.heap.cell(loc).map(|c| c.validity) {
            Some(ValidityTag::Freed) => {
                return Ok(vec![StepOutcome::error(st, ErrorKind::DoubleFree, vec![loc])]);
            }
            Some(ValidityTag::Null) => return Ok(vec![StepOutcome::Continue(st)]),
            Some(_) => {}
            None if st.is_footprint(loc) => {
                self.guard(site, || format!("precondition lacks cell {}", loc))?;
                st.abduce_cell(loc);
            }
            None => st.materialize(loc),
        }
        if let Some(cell) = st.heap.cell_mut(loc) {
            cell.validity = ValidityTag::Freed;
            cell.fields.clear();
            cell.ownership.clear();
            cell.destructed = false;
        }
        Ok(vec![StepOutcome::Continue(st)])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Destructors
    // ═══════════════════════════════════════════════════════════════════════

    /// Cell behind `var` for destructor-like operations, without the
    /// use-after-destructor check
    fn object_of(&self, st: &mut PathState, var: &str, site: Site) -> Result<std::result::Result<Sym, StepOutcome>> {
        let v = self.read_var(st, var);
        Ok(match self.access(st, v, false, site)? {
            Access::Loc(l) => Ok(l),
            Access::Defect(k, l) => Err(Self::defect_outcome(st.clone(), k, l)),
            Access::Abandon(reason) => Err(StepOutcome::Abandon {
                state: st.clone(),
                reason,
            }),
        })
    }

    fn exec_destructor(&self, mut st: PathState, var: &str, site: Site) -> Result<Vec<StepOutcome>> {
        let loc = match self.object_of(&mut st, var, site)? {
            Ok(l) => l,
            Err(outcome) => return Ok(vec![outcome]),
        };
        if st.heap.cell(loc).is_some_and(|c| c.destructed) {
            return Ok(vec![StepOutcome::error(st, ErrorKind::DoubleDestruct, vec![loc])]);
        }
        if let Some(cell) = st.heap.cell_mut(loc) {
            cell.destructed = true;
        }
        Ok(vec![StepOutcome::Continue(st)])
    }

    fn exec_construct(&self, mut st: PathState, var: &str, site: Site) -> Result<Vec<StepOutcome>> {
        let v = self.read_var(&mut st, var);
        if v.is_null_const() || st.heap.pure.entails_null(v) {
            return Ok(vec![Self::defect_outcome(st, ErrorKind::NullDeref, v.as_sym())]);
        }
        let Some(base) = v.as_sym() else {
            let reason = format!("construction at constant {}", v);
            return Ok(vec![StepOutcome::Abandon { state: st, reason }]);
        };
        let loc = st.heap.resolve_loc(base);
        if st.heap.cell(loc).is_none() {
            if st.is_footprint(loc) {
                self.guard(site, || format!("precondition lacks cell {}", loc))?;
                st.abduce_cell(loc);
            } else {
                st.materialize(loc);
            }
        }
        if let Some(cell) = st.heap.cell_mut(loc) {
            cell.destructed = false;
            if matches!(cell.validity, ValidityTag::Freed | ValidityTag::Unknown) {
                cell.validity = ValidityTag::Allocated;
            }
        }
        Ok(vec![StepOutcome::Continue(st)])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Closures
    // ═══════════════════════════════════════════════════════════════════════

    /// byRef: `closure."&x" = slot(x)`, weak ownership of the slot.
    /// byValue: `closure."=x" = snapshot`, `snapshot."*" = x`; the closure
    /// strongly owns the snapshot, which owns the copied object unless
    /// `x` is declared weak.
    fn exec_capture(&self, mut st: PathState, dst: &str, captures: &[Capture], site: Site) -> Vec<StepOutcome> {
        let closure = st.fresh();
        st.materialize(closure);
        st.heap.set_origin(
            closure,
            LocOrigin::Closure {
                procedure: self.proc.id.clone(),
                site,
            },
        );

        let mut cell = HeapCell::allocated();
        for cap in captures {
            match cap.mode {
                CaptureMode::ByRef => {
                    let slot = Value::sym(self.ensure_slot(&mut st, &cap.var));
                    let name = format!("&{}", cap.var);
                    cell.fields.insert(name.clone(), slot);
                    cell.ownership.insert(
                        name,
                        OwnershipEdge {
                            target: slot,
                            strength: Strength::Weak,
                        },
                    );
                }
                CaptureMode::ByValue => {
                    let v = self.read_var(&mut st, &cap.var);
                    let snapshot = st.fresh();
                    st.materialize(snapshot);
                    st.heap.set_origin(
                        snapshot,
                        LocOrigin::Captured {
                            closure: site,
                            var: cap.var.clone(),
                        },
                    );
                    if let Some(snap) = st.heap.cell_mut(snapshot) {
                        snap.fields.insert(SLOT_FIELD.to_string(), v);
                        if v.as_sym().is_some() {
                            let strength = if self.proc.is_weak(&cap.var) {
                                Strength::Weak
                            } else {
                                Strength::Strong
                            };
                            snap.ownership
                                .insert(SLOT_FIELD.to_string(), OwnershipEdge { target: v, strength });
                        }
                    }
                    let name = format!("={}", cap.var);
                    cell.fields.insert(name.clone(), Value::sym(snapshot));
                    cell.ownership.insert(
                        name,
                        OwnershipEdge {
                            target: Value::sym(snapshot),
                            strength: Strength::Strong,
                        },
                    );
                }
            }
        }
        st.heap.insert_cell(closure, cell);
        self.write_var(&mut st, dst, Value::sym(closure));
        vec![StepOutcome::Continue(st)]
    }

    /// Invocation reads every byRef-captured location
    fn exec_invoke(&self, mut st: PathState, dst: Option<&str>, closure: &str, site: Site) -> Result<Vec<StepOutcome>> {
        let v = self.read_var(&mut st, closure);
        let loc = match self.access(&mut st, v, true, site)? {
            Access::Loc(l) => l,
            Access::Defect(k, l) => return Ok(vec![Self::defect_outcome(st, k, l)]),
            Access::Abandon(reason) => return Ok(vec![StepOutcome::Abandon { state: st, reason }]),
        };
        let by_ref: Vec<Value> = st
            .heap
            .cell(loc)
            .map(|c| {
                c.fields
                    .iter()
                    .filter(|(name, _)| name.starts_with('&'))
                    .map(|(_, v)| *v)
                    .collect()
            })
            .unwrap_or_default();
        for target in by_ref {
            let Some(slot) = target.as_sym() else { continue };
            let slot = st.heap.resolve_loc(slot);
            if st.heap.is_dead_stack(target) {
                return Ok(vec![StepOutcome::error(st, ErrorKind::UseAfterScope, vec![slot])]);
            }
            if st.heap.is_freed(slot) {
                return Ok(vec![StepOutcome::error(st, ErrorKind::UseAfterFree, vec![slot])]);
            }
        }
        if let Some(d) = dst {
            let r = Value::sym(st.fresh());
            self.write_var(&mut st, d, r);
        }
        Ok(vec![StepOutcome::Continue(st)])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Control
    // ═══════════════════════════════════════════════════════════════════════

    fn exec_prune(&self, mut st: PathState, cond: &Cond, true_branch: bool) -> Vec<StepOutcome> {
        let cond = if true_branch { cond.clone() } else { cond.negate() };
        let (Some(lhs), Some(rhs)) = (self.eval(&mut st, &cond.lhs), self.eval(&mut st, &cond.rhs)) else {
            return vec![Self::overflow(st)];
        };
        if !st.assume(PureAtom::from_cmp(cond.op, lhs, rhs)) {
            return Vec::new();
        }
        // a null check tags the tested location
        for side in [lhs, rhs] {
            if let Some(s) = side.as_loc() {
                if st.heap.cell(s).is_none() && st.heap.pure.entails_null(side) {
                    st.heap.insert_cell(s, HeapCell::new(ValidityTag::Null));
                }
            }
        }
        vec![StepOutcome::Continue(st)]
    }

    fn exec_exit_scope(&self, mut st: PathState, scope: ScopeId) -> StepOutcome {
        let escaped = match st.scopes.remove(&scope) {
            Some(inst) => {
                st.heap.exited_scopes.insert(inst);
                self.escaped_stack(&st)
            }
            None => Vec::new(),
        };
        for local in &self.proc.locals {
            if local.storage == (Storage::Stack { scope }) {
                st.env.remove(&local.name);
                st.slots.remove(&local.name);
            }
        }
        if escaped.is_empty() {
            StepOutcome::Continue(st)
        } else {
            StepOutcome::error(st, ErrorKind::DanglingReference, escaped)
        }
    }

    /// Dead stack storage reachable from anything outliving the procedure
    fn escaped_stack(&self, st: &PathState) -> Vec<Sym> {
        let reach = st.heap.reachable(st.outliving_roots());
        st.heap.dead_stack_among(&reach)
    }

    /// Exit every live scope and check that no stack storage escapes
    pub fn exit_frame(&self, mut st: PathState) -> StepOutcome {
        for (_, inst) in std::mem::take(&mut st.scopes) {
            st.heap.exited_scopes.insert(inst);
        }
        let escaped = self.escaped_stack(&st);
        if escaped.is_empty() {
            StepOutcome::Return(st)
        } else {
            StepOutcome::error(st, ErrorKind::DanglingReference, escaped)
        }
    }

    pub(crate) fn lookup(&self) -> &'a dyn SummaryLookup {
        self.lookup
    }
}
