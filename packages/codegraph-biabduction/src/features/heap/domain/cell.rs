//! Heap cells: functional points-to plus ownership edges

use super::location::ValidityTag;
use super::value::Value;
use crate::shared::models::Strength;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference-counted ownership edge, read only by the retain-cycle detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnershipEdge {
    pub target: Value,
    pub strength: Strength,
}

/// One location's contents
///
/// At most one edge per field: non-determinism lives in the disjunction
/// of whole states, never inside a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapCell {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    pub validity: ValidityTag,
    /// Destructor ran and no re-construction followed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub destructed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ownership: BTreeMap<String, OwnershipEdge>,
}

impl HeapCell {
    pub fn new(validity: ValidityTag) -> Self {
        Self {
            fields: BTreeMap::new(),
            validity,
            destructed: false,
            ownership: BTreeMap::new(),
        }
    }

    pub fn allocated() -> Self {
        Self::new(ValidityTag::Allocated)
    }

    pub fn with_field(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    /// Values this cell points to, through fields and ownership edges
    pub fn successors(&self) -> impl Iterator<Item = Value> + '_ {
        self.fields
            .values()
            .copied()
            .chain(self.ownership.values().map(|e| e.target))
    }

    pub fn map_values(&self, f: &mut impl FnMut(Value) -> Value) -> HeapCell {
        HeapCell {
            fields: self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), f(*v)))
                .collect(),
            validity: self.validity,
            destructed: self.destructed,
            ownership: self
                .ownership
                .iter()
                .map(|(k, e)| {
                    (
                        k.clone(),
                        OwnershipEdge {
                            target: f(e.target),
                            strength: e.strength,
                        },
                    )
                })
                .collect(),
        }
    }
}
