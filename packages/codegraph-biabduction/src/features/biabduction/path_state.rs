//! Per-path execution state
//!
//! A `PathState` pairs the current symbolic heap with the precondition
//! abduced so far on the same path. Every abduction writes the same
//! fragment into both.

use super::spec::{Outcome, Spec, TraceStep, Witness};
use crate::features::heap::{
    Canonicalizer, HeapCell, LocOrigin, PureAtom, Sym, SymbolicHeap, Value,
};
use crate::shared::models::{NodeId, ProcedureDesc, ScopeId, Site, BODY_SCOPE};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathState {
    pub heap: SymbolicHeap,
    pub pre: SymbolicHeap,
    /// Initial values of the formals
    pub formals: Vec<Value>,
    /// Variables without a storage slot
    pub env: BTreeMap<String, Value>,
    /// Variables whose address was taken: value lives at `slot."*"`
    pub slots: BTreeMap<String, Sym>,
    /// Slots of static-lifetime variables
    pub statics: BTreeSet<Sym>,
    /// Live lexical scope → scope instance
    pub scopes: BTreeMap<ScopeId, ScopeId>,
    /// Symbols whose cells may be abduced into the precondition
    pub footprint: BTreeSet<Sym>,
    pub trace: Vec<Site>,
    pub path: Vec<NodeId>,
    pub choices: Vec<u32>,
    pub visits: BTreeMap<NodeId, usize>,
    pub call_abductions: usize,
    pub ret: Option<Value>,
    pub exceptional: bool,
    pub joined: bool,
    next_sym: u32,
    next_scope: ScopeId,
}

impl PathState {
    /// Entry state: a fresh symbol per formal, nothing else known
    pub fn initial(proc: &ProcedureDesc) -> Self {
        let mut st = Self::empty();
        for formal in &proc.formals {
            let s = st.fresh();
            let v = Value::sym(s);
            st.formals.push(v);
            st.footprint.insert(s);
            st.env.insert(formal.name.clone(), v);
            st.heap.set_origin(
                s,
                LocOrigin::Formal {
                    name: formal.name.clone(),
                },
            );
            st.pre.set_origin(
                s,
                LocOrigin::Formal {
                    name: formal.name.clone(),
                },
            );
            if formal.kind.is_non_null() {
                st.pre.assume(PureAtom::ne(v, Value::Null));
                st.heap.assume(PureAtom::ne(v, Value::Null));
            }
        }
        st
    }

    /// Replay state: the spec's precondition as the initial heap
    pub fn from_spec(proc: &ProcedureDesc, spec: &Spec) -> Self {
        let mut st = Self::empty();
        st.formals = spec.formals.clone();
        st.heap = spec.pre.clone();
        st.pre = spec.pre.clone();
        for (formal, v) in proc.formals.iter().zip(&spec.formals) {
            st.env.insert(formal.name.clone(), *v);
        }
        st.footprint = spec.pre.syms();
        st.footprint
            .extend(spec.formals.iter().filter_map(|v| v.as_sym()));
        st.next_sym = st.footprint.iter().map(|s| s.0 + 1).max().unwrap_or(0);
        st
    }

    fn empty() -> Self {
        Self {
            heap: SymbolicHeap::new(),
            pre: SymbolicHeap::new(),
            formals: Vec::new(),
            env: BTreeMap::new(),
            slots: BTreeMap::new(),
            statics: BTreeSet::new(),
            scopes: BTreeMap::from([(BODY_SCOPE, BODY_SCOPE)]),
            footprint: BTreeSet::new(),
            trace: Vec::new(),
            path: Vec::new(),
            choices: Vec::new(),
            visits: BTreeMap::new(),
            call_abductions: 0,
            ret: None,
            exceptional: false,
            joined: false,
            next_sym: 0,
            next_scope: BODY_SCOPE + 1,
        }
    }

    pub fn fresh(&mut self) -> Sym {
        let s = Sym(self.next_sym);
        self.next_sym += 1;
        s
    }

    pub fn is_footprint(&self, s: Sym) -> bool {
        self.footprint.contains(&s)
    }

    /// Live instance of a lexical scope, entering it if needed
    pub fn scope_instance(&mut self, lexical: ScopeId) -> ScopeId {
        if let Some(&inst) = self.scopes.get(&lexical) {
            return inst;
        }
        self.enter_scope(lexical)
    }

    pub fn enter_scope(&mut self, lexical: ScopeId) -> ScopeId {
        let inst = self.next_scope;
        self.next_scope += 1;
        self.scopes.insert(lexical, inst);
        inst
    }

    /// Conjoin a pure atom; atoms over footprint symbols also constrain
    /// the precondition. Returns false if the path became infeasible.
    pub fn assume(&mut self, atom: PureAtom) -> bool {
        if self.heap.pure.entails(&atom) {
            return true;
        }
        self.heap.assume(atom);
        let mut syms = atom.syms().peekable();
        if syms.peek().is_some() && atom.syms().all(|s| self.footprint.contains(&s)) {
            self.pre.assume(atom);
            if !self.pre.pure.is_satisfiable() {
                return false;
            }
        }
        self.heap.is_feasible()
    }

    /// Abduce `loc ↦ {}` into pre and state
    pub fn abduce_cell(&mut self, loc: Sym) {
        let not_null = PureAtom::ne(Value::sym(loc), Value::Null);
        self.pre.insert_cell(loc, HeapCell::allocated());
        self.pre.assume(not_null);
        self.heap.insert_cell(loc, HeapCell::allocated());
        self.heap.assume(not_null);
    }

    /// Abduce `loc.field ↦ fresh` into pre and state
    pub fn abduce_field(&mut self, loc: Sym, field: &str) -> Value {
        let s = self.fresh();
        let v = Value::sym(s);
        self.footprint.insert(s);
        if let Some(base) = self.heap.origins.get(&loc).cloned() {
            let origin = LocOrigin::Field {
                base: Box::new(base),
                field: field.to_string(),
            };
            self.heap.set_origin(s, origin.clone());
            self.pre.set_origin(s, origin);
        }
        if let Some(cell) = self.pre.cell_mut(loc) {
            cell.fields.insert(field.to_string(), v);
        }
        if let Some(cell) = self.heap.cell_mut(loc) {
            cell.fields.insert(field.to_string(), v);
        }
        v
    }

    /// Allocate a fresh cell that is not part of the footprint
    pub fn materialize(&mut self, loc: Sym) {
        self.heap.insert_cell(loc, HeapCell::allocated());
        self.heap.assume(PureAtom::ne(Value::sym(loc), Value::Null));
    }

    /// Roots that outlive the procedure: formals' footprint, statics, return
    pub fn outliving_roots(&self) -> Vec<Sym> {
        let mut roots: Vec<Sym> = self.footprint.iter().copied().collect();
        roots.extend(self.statics.iter().copied());
        if let Some(s) = self.ret.and_then(|v| v.as_sym()) {
            roots.push(s);
        }
        roots
    }

    /// Close this path into a spec
    pub fn into_spec(self, proc: &ProcedureDesc, outcome: Outcome, locations: &[Sym]) -> Spec {
        let mut roots = self.outliving_roots();
        roots.extend(self.formals.iter().filter_map(|v| v.as_sym()));
        let post = self.heap.gc(roots, outcome == Outcome::Ok);
        let trace = self
            .trace
            .iter()
            .map(|site| TraceStep {
                site: *site,
                loc: proc
                    .cfg
                    .node(site.node)
                    .and_then(|n| n.instrs.get(site.index as usize))
                    .and_then(|i| i.loc.clone()),
            })
            .collect();
        Spec {
            formals: self.formals,
            post,
            ret: self.ret,
            outcome,
            exceptional: self.exceptional,
            witness: Witness {
                trace,
                locations: locations.iter().map(|l| self.heap.describe(*l)).collect(),
                path: self.path,
                choices: self.choices,
                joined: self.joined,
            },
            pre: self.pre,
        }
    }

    /// Whether two states at the same node can be joined
    pub fn compatible(&self, other: &PathState) -> bool {
        self.pre == other.pre
            && self.formals == other.formals
            && self.footprint == other.footprint
            && self.slots == other.slots
            && self.scopes == other.scopes
            && self.statics == other.statics
    }

    /// Join two compatible states; the witness of `self` is kept
    pub fn join(&self, other: &PathState) -> PathState {
        let mut next = self.next_sym.max(other.next_sym);
        let mut fresh = || {
            let s = Sym(next);
            next += 1;
            s
        };
        let heap = self.heap.join(&other.heap, &mut fresh);

        let mut env = other.env.clone();
        for (name, v) in &self.env {
            let joined = match other.env.get(name) {
                Some(w) if w != v => Value::sym(fresh()),
                _ => *v,
            };
            env.insert(name.clone(), joined);
        }

        let mut visits = self.visits.clone();
        for (node, n) in &other.visits {
            let e = visits.entry(*node).or_insert(0);
            *e = (*e).max(*n);
        }

        PathState {
            heap,
            env,
            visits,
            call_abductions: self.call_abductions.max(other.call_abductions),
            joined: true,
            next_sym: next,
            next_scope: self.next_scope.max(other.next_scope),
            ..self.clone()
        }
    }

    /// Key equal for states identical up to symbol renaming
    pub fn state_key(&self) -> String {
        let mut canon = Canonicalizer::new();
        let mut roots: Vec<Value> = self.formals.clone();
        roots.extend(self.env.values().copied());
        roots.extend(self.slots.values().map(|s| Value::sym(*s)));
        for r in &roots {
            canon.visit_value(*r);
        }
        canon.visit_heap(&self.pre, &self.formals);
        canon.visit_heap(&self.heap, &roots);
        let env: Vec<(&String, Value)> = self.env.iter().map(|(k, v)| (k, canon.value(*v))).collect();
        let slots: Vec<(&String, Value)> = self
            .slots
            .iter()
            .map(|(k, s)| (k, canon.value(Value::sym(*s))))
            .collect();
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}",
            env,
            slots,
            canon.heap(&self.pre),
            canon.heap(&self.heap),
            self.scopes
        )
    }
}
