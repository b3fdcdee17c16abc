//! Symbolic locations and their validity

use crate::shared::models::{ProcedureId, ScopeId, Site};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbolic value
///
/// Fresh per symbolic execution. A heap location is identified by the
/// symbol of its base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sym(pub u32);

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?v{}", self.0)
    }
}

/// Per-location validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityTag {
    Allocated,
    Freed,
    Null,
    /// Validity lost at a join, or unknown callee effect
    Unknown,
    /// Storage of a local that dies when the scope instance exits
    StackLocal(ScopeId),
}

impl ValidityTag {
    /// Whether fields may be read and written through this location,
    /// given the set of exited scope instances
    pub fn is_live(self, exited: &std::collections::BTreeSet<ScopeId>) -> bool {
        match self {
            ValidityTag::Allocated | ValidityTag::Unknown => true,
            ValidityTag::StackLocal(s) => !exited.contains(&s),
            ValidityTag::Freed | ValidityTag::Null => false,
        }
    }
}

/// What a location stands for, used for diagnostics only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum LocOrigin {
    /// Value of a formal parameter
    Formal { name: String },
    /// Storage slot of a local variable
    Local { name: String },
    /// Storage of a static-lifetime variable
    Static { name: String },
    /// Allocation site
    Heap { procedure: ProcedureId, site: Site },
    /// Target of `base.field`
    Field { base: Box<LocOrigin>, field: String },
    /// By-value snapshot of a captured variable
    Captured { closure: Site, var: String },
    /// Closure object
    Closure { procedure: ProcedureId, site: Site },
    /// Value returned by a call
    Returned { callee: ProcedureId, site: Site },
}

impl fmt::Display for LocOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocOrigin::Formal { name } => write!(f, "{}", name),
            LocOrigin::Local { name } => write!(f, "&{}", name),
            LocOrigin::Static { name } => write!(f, "&static {}", name),
            LocOrigin::Heap { procedure, site } => write!(f, "new@{}:{}", procedure, site),
            LocOrigin::Field { base, field } => write!(f, "{}.{}", base, field),
            LocOrigin::Captured { closure, var } => write!(f, "closure@{}.{}", closure, var),
            LocOrigin::Closure { procedure, site } => write!(f, "closure@{}:{}", procedure, site),
            LocOrigin::Returned { callee, site } => write!(f, "{}()@{}", callee, site),
        }
    }
}

/// A location as exposed in defect records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbstractLocation {
    pub sym: Sym,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<LocOrigin>,
}

impl fmt::Display for AbstractLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(o) => write!(f, "{} ({})", self.sym, o),
            None => write!(f, "{}", self.sym),
        }
    }
}
