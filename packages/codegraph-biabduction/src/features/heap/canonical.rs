//! Canonical renaming of symbolic states
//!
//! Two states that differ only in the names of their symbols get the same
//! canonical form: symbols are renumbered in the order a breadth-first walk
//! from the given roots first meets them (fields in name order), then any
//! leftover cells, then symbols only mentioned by pure atoms.

use super::domain::{Sym, Value};
use super::symbolic_heap::SymbolicHeap;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Default)]
pub struct Canonicalizer {
    map: BTreeMap<Sym, Sym>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(&mut self, s: Sym) -> bool {
        if self.map.contains_key(&s) {
            return false;
        }
        let next = Sym(self.map.len() as u32);
        self.map.insert(s, next);
        true
    }

    pub fn visit_value(&mut self, v: Value) {
        if let Some(s) = v.as_sym() {
            self.assign(s);
        }
    }

    /// Number symbols reachable from `roots`, then the rest of `heap`
    pub fn visit_heap(&mut self, heap: &SymbolicHeap, roots: &[Value]) {
        let mut queue: VecDeque<Sym> = VecDeque::new();
        for root in roots {
            if let Some(s) = root.as_sym() {
                self.assign(s);
                queue.push_back(s);
            }
        }
        self.walk(heap, &mut queue);

        for &loc in heap.cells.keys() {
            if self.assign(loc) {
                queue.push_back(loc);
                self.walk(heap, &mut queue);
            }
        }
        for s in heap.pure.syms() {
            self.assign(s);
        }
    }

    fn walk(&mut self, heap: &SymbolicHeap, queue: &mut VecDeque<Sym>) {
        while let Some(loc) = queue.pop_front() {
            let Some(cell) = heap.cell(loc) else {
                continue;
            };
            for v in cell.successors() {
                if let Some(s) = v.as_sym() {
                    if self.assign(s) {
                        queue.push_back(s);
                    }
                }
            }
        }
    }

    pub fn value(&self, v: Value) -> Value {
        v.map_sym(&mut |s| Value::sym(self.map.get(&s).copied().unwrap_or(s)))
    }

    /// Renamed copy without diagnostic origins
    pub fn heap(&self, heap: &SymbolicHeap) -> SymbolicHeap {
        let mut renamed = heap.rename(&mut |s| self.map.get(&s).copied().unwrap_or(s));
        renamed.origins.clear();
        renamed
    }
}
