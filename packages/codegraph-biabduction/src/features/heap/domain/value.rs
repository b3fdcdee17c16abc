//! Symbolic values with offset arithmetic

use super::location::Sym;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// `sym + offset`
    Sym { sym: Sym, offset: i64 },
    Int(i64),
    Null,
}

impl Value {
    pub fn sym(sym: Sym) -> Self {
        Value::Sym { sym, offset: 0 }
    }

    /// `self + k`; null plus a non-zero offset is an integer. `None` when
    /// the constant or offset leaves the `i64` range
    pub fn checked_add(self, k: i64) -> Option<Self> {
        Some(match self {
            Value::Sym { sym, offset } => Value::Sym {
                sym,
                offset: offset.checked_add(k)?,
            },
            Value::Int(n) => Value::Int(n.checked_add(k)?),
            Value::Null if k == 0 => Value::Null,
            Value::Null => Value::Int(k),
        })
    }

    /// `self + k`, saturating at the `i64` bounds
    ///
    /// Used for substitution; program arithmetic goes through
    /// [`Value::checked_add`].
    pub fn add(self, k: i64) -> Self {
        match self {
            Value::Sym { sym, offset } => Value::Sym {
                sym,
                offset: offset.saturating_add(k),
            },
            Value::Int(n) => Value::Int(n.saturating_add(k)),
            Value::Null if k == 0 => Value::Null,
            Value::Null => Value::Int(k),
        }
    }

    /// Base symbol, if this is a symbolic value
    pub fn as_sym(&self) -> Option<Sym> {
        match self {
            Value::Sym { sym, .. } => Some(*sym),
            _ => None,
        }
    }

    /// Location named by this value (offset zero)
    pub fn as_loc(&self) -> Option<Sym> {
        match self {
            Value::Sym { sym, offset: 0 } => Some(*sym),
            _ => None,
        }
    }

    /// Syntactically null (`Null` or integer zero)
    pub fn is_null_const(&self) -> bool {
        matches!(self, Value::Null | Value::Int(0))
    }

    /// Constant this value denotes, with null as zero
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Null => Some(0),
            Value::Sym { .. } => None,
        }
    }

    /// Apply a symbol substitution
    pub fn map_sym(self, f: &mut impl FnMut(Sym) -> Value) -> Value {
        match self {
            Value::Sym { sym, offset } => f(sym).add(offset),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Sym { sym, offset: 0 } => write!(f, "{}", sym),
            Value::Sym { sym, offset } if *offset > 0 => write!(f, "{}+{}", sym, offset),
            Value::Sym { sym, offset } => write!(f, "{}{}", sym, offset),
            Value::Int(n) => write!(f, "{}", n),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<Sym> for Value {
    fn from(sym: Sym) -> Self {
        Value::sym(sym)
    }
}
