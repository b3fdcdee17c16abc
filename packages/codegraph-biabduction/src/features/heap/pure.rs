//! Pure constraints and their decision procedure
//!
//! Atoms are (in)equalities between values of the form `sym + k` or
//! constants (null is the constant 0).
//!
//! ## Decision procedure
//! ```text
//! 1. Equalities      union-find with offsets:  val(x) = val(root(x)) + off(x)
//!                    constants hang off a distinguished Zero node
//! 2. Disequalities   unsat iff both sides reduce to the same root and offset
//! 3. Orderings       difference constraints over roots, Bellman-Ford
//!                    negative-cycle check (integers: a < b  ⇔  a - b ≤ -1)
//! ```
//! Entailment `Π ⊢ a` is checked as unsatisfiability of `Π ∧ ¬a`.
//! Offsets are `i64` in atoms and `i128` inside the solver, so sums and
//! differences of atom constants stay exact.

use super::domain::{Sym, Value};
use crate::shared::models::CmpOp;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PureAtom {
    Eq(Value, Value),
    Ne(Value, Value),
    Lt(Value, Value),
    Le(Value, Value),
}

impl PureAtom {
    /// Symmetric atoms are stored with ordered operands
    pub fn eq(a: Value, b: Value) -> Self {
        if a <= b {
            PureAtom::Eq(a, b)
        } else {
            PureAtom::Eq(b, a)
        }
    }

    pub fn ne(a: Value, b: Value) -> Self {
        if a <= b {
            PureAtom::Ne(a, b)
        } else {
            PureAtom::Ne(b, a)
        }
    }

    /// Atom for `a op b`
    pub fn from_cmp(op: CmpOp, a: Value, b: Value) -> Self {
        match op {
            CmpOp::Eq => Self::eq(a, b),
            CmpOp::Ne => Self::ne(a, b),
            CmpOp::Lt => PureAtom::Lt(a, b),
            CmpOp::Le => PureAtom::Le(a, b),
            CmpOp::Gt => PureAtom::Lt(b, a),
            CmpOp::Ge => PureAtom::Le(b, a),
        }
    }

    pub fn negate(&self) -> Self {
        match *self {
            PureAtom::Eq(a, b) => Self::ne(a, b),
            PureAtom::Ne(a, b) => Self::eq(a, b),
            PureAtom::Lt(a, b) => PureAtom::Le(b, a),
            PureAtom::Le(a, b) => PureAtom::Lt(b, a),
        }
    }

    pub fn operands(&self) -> (Value, Value) {
        match *self {
            PureAtom::Eq(a, b) | PureAtom::Ne(a, b) | PureAtom::Lt(a, b) | PureAtom::Le(a, b) => {
                (a, b)
            }
        }
    }

    pub fn syms(&self) -> impl Iterator<Item = Sym> {
        let (a, b) = self.operands();
        a.as_sym().into_iter().chain(b.as_sym())
    }

    pub fn map_values(&self, f: &mut impl FnMut(Value) -> Value) -> Self {
        match *self {
            PureAtom::Eq(a, b) => Self::eq(f(a), f(b)),
            PureAtom::Ne(a, b) => Self::ne(f(a), f(b)),
            PureAtom::Lt(a, b) => PureAtom::Lt(f(a), f(b)),
            PureAtom::Le(a, b) => PureAtom::Le(f(a), f(b)),
        }
    }

    /// Trivially true without any context
    fn is_tautology(&self) -> bool {
        let (a, b) = self.operands();
        match self {
            PureAtom::Eq(..) => a == b || matches!((a.as_const(), b.as_const()), (Some(x), Some(y)) if x == y),
            PureAtom::Le(..) => a == b || matches!((a.as_const(), b.as_const()), (Some(x), Some(y)) if x <= y),
            PureAtom::Ne(..) => matches!((a.as_const(), b.as_const()), (Some(x), Some(y)) if x != y),
            PureAtom::Lt(..) => matches!((a.as_const(), b.as_const()), (Some(x), Some(y)) if x < y),
        }
    }
}

impl fmt::Display for PureAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PureAtom::Eq(a, b) => write!(f, "{} == {}", a, b),
            PureAtom::Ne(a, b) => write!(f, "{} != {}", a, b),
            PureAtom::Lt(a, b) => write!(f, "{} < {}", a, b),
            PureAtom::Le(a, b) => write!(f, "{} <= {}", a, b),
        }
    }
}

/// Conjunction of pure atoms
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PureState {
    atoms: BTreeSet<PureAtom>,
}

impl PureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conjoin an atom; tautologies are not stored
    pub fn add(&mut self, atom: PureAtom) {
        if !atom.is_tautology() {
            self.atoms.insert(atom);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PureAtom> {
        self.atoms.iter()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn contains(&self, atom: &PureAtom) -> bool {
        self.atoms.contains(atom)
    }

    pub fn is_satisfiable(&self) -> bool {
        Solver::build(self.atoms.iter()).is_some()
    }

    /// `self ⊢ atom`
    pub fn entails(&self, atom: &PureAtom) -> bool {
        if atom.is_tautology() {
            return true;
        }
        let negated = atom.negate();
        Solver::build(self.atoms.iter().chain(std::iter::once(&negated))).is_none()
    }

    pub fn entails_eq(&self, a: Value, b: Value) -> bool {
        a == b || self.entails(&PureAtom::eq(a, b))
    }

    /// `self ⊢ v == null`
    pub fn entails_null(&self, v: Value) -> bool {
        v.is_null_const() || self.entails(&PureAtom::eq(v, Value::Null))
    }

    /// Atoms present in both states
    pub fn intersect(&self, other: &PureState) -> PureState {
        PureState {
            atoms: self.atoms.intersection(&other.atoms).copied().collect(),
        }
    }

    /// Keep only atoms mentioning syms in `keep`
    pub fn restrict(&self, keep: &BTreeSet<Sym>) -> PureState {
        PureState {
            atoms: self
                .atoms
                .iter()
                .filter(|a| a.syms().all(|s| keep.contains(&s)))
                .copied()
                .collect(),
        }
    }

    pub fn map_values(&self, f: &mut impl FnMut(Value) -> Value) -> PureState {
        let mut out = PureState::new();
        for atom in &self.atoms {
            out.add(atom.map_values(f));
        }
        out
    }

    pub fn syms(&self) -> BTreeSet<Sym> {
        self.atoms.iter().flat_map(|a| a.syms()).collect()
    }

    /// Equality classes of the current atoms; `None` if unsatisfiable
    pub fn congruence(&self) -> Option<Congruence> {
        Solver::build(self.atoms.iter()).map(|solver| Congruence { solver })
    }
}

/// Equality classes induced by a satisfiable `PureState`
pub struct Congruence {
    solver: Solver,
}

impl Congruence {
    /// Class representative and offset; `None` stands for the constant class
    pub fn class_of(&mut self, v: Value) -> (Option<Sym>, i128) {
        match self.solver.normalize(term(v)) {
            (Node::Zero, k) => (None, k),
            (Node::Sym(s), k) => (Some(s), k),
        }
    }

    pub fn same(&mut self, a: Value, b: Value) -> bool {
        self.class_of(a) == self.class_of(b)
    }
}

impl Extend<PureAtom> for PureState {
    fn extend<I: IntoIterator<Item = PureAtom>>(&mut self, iter: I) {
        for atom in iter {
            self.add(atom);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Solver
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Zero,
    Sym(Sym),
}

fn term(v: Value) -> (Node, i128) {
    match v {
        Value::Sym { sym, offset } => (Node::Sym(sym), i128::from(offset)),
        Value::Int(n) => (Node::Zero, i128::from(n)),
        Value::Null => (Node::Zero, 0),
    }
}

/// Union-find with offsets; `parent[x] = (p, d)` means `val(x) = val(p) + d`
#[derive(Default)]
struct Solver {
    parent: FxHashMap<Node, (Node, i128)>,
}

impl Solver {
    /// Build from atoms; `None` if they are unsatisfiable
    fn build<'a>(atoms: impl Iterator<Item = &'a PureAtom> + Clone) -> Option<Self> {
        let mut solver = Solver::default();

        for atom in atoms.clone() {
            if let PureAtom::Eq(a, b) = atom {
                if !solver.union(term(*a), term(*b)) {
                    return None;
                }
            }
        }

        // edge (from, to, w) encodes val(to) - val(from) <= w
        let mut edges: Vec<(Node, Node, i128)> = Vec::new();
        for atom in atoms {
            match atom {
                PureAtom::Eq(..) => {}
                PureAtom::Ne(a, b) => {
                    if solver.normalize(term(*a)) == solver.normalize(term(*b)) {
                        return None;
                    }
                }
                PureAtom::Lt(a, b) | PureAtom::Le(a, b) => {
                    let strict = matches!(atom, PureAtom::Lt(..));
                    let (ra, ca) = solver.normalize(term(*a));
                    let (rb, cb) = solver.normalize(term(*b));
                    let bound = cb - ca - i128::from(strict);
                    if ra == rb {
                        if bound < 0 {
                            return None;
                        }
                    } else {
                        edges.push((rb, ra, bound));
                    }
                }
            }
        }

        if !edges.is_empty() && has_negative_cycle(&edges) {
            return None;
        }
        Some(solver)
    }

    fn find(&mut self, x: Node) -> (Node, i128) {
        let mut path = Vec::new();
        let mut cur = x;
        let mut acc = 0i128;
        while let Some(&(p, d)) = self.parent.get(&cur) {
            path.push((cur, acc));
            acc += d;
            cur = p;
        }
        // path compression: every visited node now points at the root
        for (node, before) in path {
            self.parent.insert(node, (cur, acc - before));
        }
        (cur, acc)
    }

    fn normalize(&mut self, (node, k): (Node, i128)) -> (Node, i128) {
        let (root, off) = self.find(node);
        (root, off + k)
    }

    /// Assert `val(a) + ka = val(b) + kb`; false on contradiction
    fn union(&mut self, a: (Node, i128), b: (Node, i128)) -> bool {
        let (ra, ca) = self.normalize(a);
        let (rb, cb) = self.normalize(b);
        if ra == rb {
            return ca == cb;
        }
        // val(ra) = val(rb) + (cb - ca); Zero always stays a root
        if ra == Node::Zero {
            self.parent.insert(rb, (ra, ca - cb));
        } else {
            self.parent.insert(ra, (rb, cb - ca));
        }
        true
    }
}

fn has_negative_cycle(edges: &[(Node, Node, i128)]) -> bool {
    let mut dist: FxHashMap<Node, i128> = FxHashMap::default();
    for &(u, v, _) in edges {
        dist.insert(u, 0);
        dist.insert(v, 0);
    }
    let n = dist.len();
    for _ in 0..n {
        let mut changed = false;
        for &(u, v, w) in edges {
            let du = dist.get(&u).copied().unwrap_or(0);
            let dv = dist.get(&v).copied().unwrap_or(0);
            if du.saturating_add(w) < dv {
                dist.insert(v, du.saturating_add(w));
                changed = true;
            }
        }
        if !changed {
            return false;
        }
    }
    true
}
