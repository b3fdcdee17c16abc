//! Symbolic heap: the state that flows through interpretation
//!
//! ```text
//! H ::= x₁ ↦ {f: v, ...} * x₂ ↦ {...} * ...   (cells, pairwise disjoint)
//!     ∧ Π                                     (pure atoms)
//! ```
//! Distinct cells denote distinct addresses (separating conjunction), so a
//! pure state that forces two cells to alias makes the heap infeasible.

use super::domain::{AbstractLocation, HeapCell, LocOrigin, OwnershipEdge, Sym, ValidityTag, Value};
use super::pure::{PureAtom, PureState};
use crate::shared::models::{ScopeId, Strength};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicHeap {
    pub cells: BTreeMap<Sym, HeapCell>,
    #[serde(default, skip_serializing_if = "PureState::is_empty")]
    pub pure: PureState,
    /// Scope instances whose exit has been interpreted
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exited_scopes: BTreeSet<ScopeId>,
    /// Diagnostics only; never part of state comparison keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub origins: BTreeMap<Sym, LocOrigin>,
}

impl SymbolicHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, loc: Sym) -> Option<&HeapCell> {
        self.cells.get(&loc)
    }

    pub fn cell_mut(&mut self, loc: Sym) -> Option<&mut HeapCell> {
        self.cells.get_mut(&loc)
    }

    pub fn insert_cell(&mut self, loc: Sym, cell: HeapCell) {
        self.cells.insert(loc, cell);
    }

    pub fn set_origin(&mut self, loc: Sym, origin: LocOrigin) {
        self.origins.entry(loc).or_insert(origin);
    }

    pub fn describe(&self, loc: Sym) -> AbstractLocation {
        AbstractLocation {
            sym: loc,
            origin: self.origins.get(&loc).cloned(),
        }
    }

    pub fn assume(&mut self, atom: PureAtom) {
        self.pure.add(atom);
    }

    /// Cell that `loc` denotes, following pure equalities
    pub fn resolve_loc(&self, loc: Sym) -> Sym {
        if self.cells.contains_key(&loc) || self.pure.is_empty() {
            return loc;
        }
        let Some(mut cong) = self.pure.congruence() else {
            return loc;
        };
        let target = cong.class_of(Value::sym(loc));
        self.cells
            .keys()
            .copied()
            .find(|&k| cong.class_of(Value::sym(k)) == target)
            .unwrap_or(loc)
    }

    /// Whether the cell at `loc` has been freed
    pub fn is_freed(&self, loc: Sym) -> bool {
        matches!(self.cell(loc), Some(c) if c.validity == ValidityTag::Freed)
    }

    /// Whether `v` points to storage of an exited scope instance
    pub fn is_dead_stack(&self, v: Value) -> bool {
        let Some(loc) = v.as_sym() else {
            return false;
        };
        matches!(
            self.cell(self.resolve_loc(loc)),
            Some(HeapCell { validity: ValidityTag::StackLocal(s), .. }) if self.exited_scopes.contains(s)
        )
    }

    /// Pure part satisfiable, and no two cells forced to alias or be null
    pub fn is_feasible(&self) -> bool {
        let Some(mut cong) = self.pure.congruence() else {
            return false;
        };
        let mut seen = FxHashSet::default();
        for (&loc, cell) in &self.cells {
            if cell.validity == ValidityTag::Null {
                if self.pure.entails(&PureAtom::ne(Value::sym(loc), Value::Null)) {
                    return false;
                }
                continue;
            }
            let class = cong.class_of(Value::sym(loc));
            if class == (None, 0) || !seen.insert(class) {
                return false;
            }
        }
        true
    }

    /// Locations reachable from `roots` through fields and ownership edges
    pub fn reachable(&self, roots: impl IntoIterator<Item = Sym>) -> BTreeSet<Sym> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Sym> = roots.into_iter().collect();
        while let Some(loc) = queue.pop_front() {
            if !seen.insert(loc) {
                continue;
            }
            if let Some(cell) = self.cells.get(&loc) {
                for v in cell.successors() {
                    if let Some(s) = v.as_sym() {
                        if !seen.contains(&s) {
                            queue.push_back(s);
                        }
                    }
                }
            }
        }
        seen
    }

    /// Locations tagged with an exited `StackLocal` among `locs`
    pub fn dead_stack_among<'a>(&self, locs: impl IntoIterator<Item = &'a Sym>) -> Vec<Sym> {
        locs.into_iter()
            .filter(|l| {
                matches!(
                    self.cell(**l),
                    Some(HeapCell { validity: ValidityTag::StackLocal(s), .. }) if self.exited_scopes.contains(s)
                )
            })
            .copied()
            .collect()
    }

    /// Drop cells not reachable from `roots`
    ///
    /// Cells carrying or targeted by ownership edges are kept as roots too,
    /// so reference-counted objects survive for retain-cycle detection.
    /// With `drop_stack`, storage of stack locals is removed as well.
    pub fn gc(&self, roots: impl IntoIterator<Item = Sym>, drop_stack: bool) -> SymbolicHeap {
        let mut all_roots: Vec<Sym> = roots.into_iter().collect();
        for (&loc, cell) in &self.cells {
            if !cell.ownership.is_empty() {
                all_roots.push(loc);
            }
        }
        let keep = self.reachable(all_roots);

        let cells: BTreeMap<Sym, HeapCell> = self
            .cells
            .iter()
            .filter(|(loc, cell)| {
                keep.contains(*loc)
                    && !(drop_stack && matches!(cell.validity, ValidityTag::StackLocal(_)))
            })
            .map(|(loc, cell)| (*loc, cell.clone()))
            .collect();

        let mut mentioned: BTreeSet<Sym> = keep.clone();
        for cell in cells.values() {
            mentioned.extend(cell.successors().filter_map(|v| v.as_sym()));
        }

        SymbolicHeap {
            origins: self
                .origins
                .iter()
                .filter(|(s, _)| cells.contains_key(*s))
                .map(|(s, o)| (*s, o.clone()))
                .collect(),
            pure: self.pure.restrict(&mentioned),
            exited_scopes: if drop_stack {
                BTreeSet::new()
            } else {
                self.exited_scopes.clone()
            },
            cells,
        }
    }

    /// Every symbol mentioned by cells and pure atoms
    pub fn syms(&self) -> BTreeSet<Sym> {
        let mut out: BTreeSet<Sym> = self.cells.keys().copied().collect();
        for cell in self.cells.values() {
            out.extend(cell.successors().filter_map(|v| v.as_sym()));
        }
        out.extend(self.pure.syms());
        out
    }

    /// Rename symbols; `f` must be injective on the heap's symbols
    pub fn rename(&self, f: &mut impl FnMut(Sym) -> Sym) -> SymbolicHeap {
        let mut map_value = |v: Value| v.map_sym(&mut |s| Value::sym(f(s)));
        SymbolicHeap {
            cells: self
                .cells
                .iter()
                .map(|(loc, cell)| {
                    let key = map_value(Value::sym(*loc)).as_sym().unwrap_or(*loc);
                    (key, cell.map_values(&mut map_value))
                })
                .collect(),
            pure: self.pure.map_values(&mut map_value),
            exited_scopes: self.exited_scopes.clone(),
            origins: self
                .origins
                .iter()
                .map(|(s, o)| {
                    let key = map_value(Value::sym(*s)).as_sym().unwrap_or(*s);
                    (key, o.clone())
                })
                .collect(),
        }
    }

    /// Ownership edges `(owner, field, target, strength)` between locations
    pub fn ownership_edges(&self) -> Vec<(Sym, String, Sym, Strength)> {
        let mut out = Vec::new();
        for (&owner, cell) in &self.cells {
            for (field, OwnershipEdge { target, strength }) in &cell.ownership {
                if let Some(t) = target.as_sym() {
                    out.push((owner, field.clone(), self.resolve_loc(t), *strength));
                }
            }
        }
        out
    }

    /// Join two states reached along different paths
    ///
    /// Agreeing edges are kept, disagreeing targets become fresh unknown
    /// symbols, disagreeing validity becomes `Unknown`, and only pure atoms
    /// present on both sides survive.
    pub fn join(&self, other: &SymbolicHeap, fresh: &mut impl FnMut() -> Sym) -> SymbolicHeap {
        let mut cells = BTreeMap::new();
        let keys: BTreeSet<Sym> = self.cells.keys().chain(other.cells.keys()).copied().collect();
        for loc in keys {
            let cell = match (self.cells.get(&loc), other.cells.get(&loc)) {
                (Some(a), Some(b)) => join_cells(a, b, fresh),
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => continue,
            };
            cells.insert(loc, cell);
        }

        let mut origins = other.origins.clone();
        origins.extend(self.origins.iter().map(|(s, o)| (*s, o.clone())));

        SymbolicHeap {
            cells,
            pure: self.pure.intersect(&other.pure),
            exited_scopes: self
                .exited_scopes
                .intersection(&other.exited_scopes)
                .copied()
                .collect(),
            origins,
        }
    }
}

fn join_cells(a: &HeapCell, b: &HeapCell, fresh: &mut impl FnMut() -> Sym) -> HeapCell {
    let mut fields = BTreeMap::new();
    let names: BTreeSet<&String> = a.fields.keys().chain(b.fields.keys()).collect();
    for name in names {
        let v = match (a.fields.get(name), b.fields.get(name)) {
            (Some(x), Some(y)) if x == y => *x,
            (Some(_), Some(_)) => Value::sym(fresh()),
            (Some(x), None) | (None, Some(x)) => *x,
            (None, None) => continue,
        };
        fields.insert(name.clone(), v);
    }

    let mut ownership = BTreeMap::new();
    for (name, edge) in &a.ownership {
        match b.ownership.get(name) {
            Some(other) if other == edge => {
                ownership.insert(name.clone(), *edge);
            }
            Some(_) => {}
            None => {
                ownership.insert(name.clone(), *edge);
            }
        }
    }
    for (name, edge) in &b.ownership {
        if !a.ownership.contains_key(name) {
            ownership.insert(name.clone(), *edge);
        }
    }

    HeapCell {
        fields,
        validity: if a.validity == b.validity {
            a.validity
        } else {
            ValidityTag::Unknown
        },
        destructed: a.destructed || b.destructed,
        ownership,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(n: u32) -> Value {
        Value::sym(Sym(n))
    }

    #[test]
    fn test_aliasing_cells_infeasible() {
        let mut heap = SymbolicHeap::new();
        heap.insert_cell(Sym(1), HeapCell::allocated());
        heap.insert_cell(Sym(2), HeapCell::allocated());
        assert!(heap.is_feasible());
        heap.assume(PureAtom::eq(v(1), v(2)));
        assert!(!heap.is_feasible());
    }

    #[test]
    fn test_allocated_cell_cannot_be_null() {
        let mut heap = SymbolicHeap::new();
        heap.insert_cell(Sym(1), HeapCell::allocated());
        heap.assume(PureAtom::eq(v(1), Value::Null));
        assert!(!heap.is_feasible());
    }

    #[test]
    fn test_resolve_loc_through_equality() {
        let mut heap = SymbolicHeap::new();
        heap.insert_cell(Sym(1), HeapCell::allocated());
        heap.assume(PureAtom::eq(v(1), v(5)));
        assert_eq!(heap.resolve_loc(Sym(5)), Sym(1));
        assert_eq!(heap.resolve_loc(Sym(6)), Sym(6));
    }

    #[test]
    fn test_gc_drops_unreachable_and_stack() {
        let mut heap = SymbolicHeap::new();
        heap.insert_cell(Sym(1), HeapCell::allocated().with_field("next", v(2)));
        heap.insert_cell(Sym(2), HeapCell::allocated());
        heap.insert_cell(Sym(3), HeapCell::allocated());
        heap.insert_cell(Sym(4), HeapCell::new(ValidityTag::StackLocal(0)));
        heap.assume(PureAtom::ne(v(3), Value::Null));

        let gc = heap.gc([Sym(1), Sym(4)], true);
        assert_eq!(gc.cells.keys().copied().collect::<Vec<_>>(), vec![Sym(1), Sym(2)]);
        assert!(gc.pure.is_empty());
    }

    #[test]
    fn test_gc_keeps_ownership_cells() {
        let mut heap = SymbolicHeap::new();
        let mut a = HeapCell::allocated();
        a.ownership.insert(
            "b".into(),
            OwnershipEdge {
                target: v(2),
                strength: Strength::Strong,
            },
        );
        heap.insert_cell(Sym(1), a);
        heap.insert_cell(Sym(2), HeapCell::allocated());
        let gc = heap.gc(std::iter::empty(), true);
        assert_eq!(gc.cells.len(), 2);
    }

    #[test]
    fn test_join_widens_disagreeing_edges() {
        let mut a = SymbolicHeap::new();
        a.insert_cell(Sym(1), HeapCell::allocated().with_field("f", Value::Int(1)).with_field("g", v(2)));
        a.assume(PureAtom::ne(v(1), Value::Null));
        a.assume(PureAtom::Lt(v(2), Value::Int(3)));

        let mut b = SymbolicHeap::new();
        let mut cell = HeapCell::new(ValidityTag::Freed)
            .with_field("f", Value::Int(2))
            .with_field("g", v(2));
        cell.destructed = true;
        b.insert_cell(Sym(1), cell);
        b.assume(PureAtom::ne(v(1), Value::Null));

        let mut next = 10;
        let joined = a.join(&b, &mut || {
            next += 1;
            Sym(next)
        });
        let cell = joined.cell(Sym(1)).unwrap();
        assert_eq!(cell.fields["f"], v(11));
        assert_eq!(cell.fields["g"], v(2));
        assert_eq!(cell.validity, ValidityTag::Unknown);
        assert!(cell.destructed);
        assert_eq!(joined.pure.len(), 1);
    }

    #[test]
    fn test_rename() {
        let mut heap = SymbolicHeap::new();
        heap.insert_cell(Sym(4), HeapCell::allocated().with_field("f", v(7).add(1)));
        heap.assume(PureAtom::ne(v(4), Value::Null));
        let renamed = heap.rename(&mut |s| Sym(s.0 * 10));
        assert_eq!(renamed.cell(Sym(40)).unwrap().fields["f"], v(70).add(1));
        assert!(renamed.pure.contains(&PureAtom::ne(v(40), Value::Null)));
    }
}
