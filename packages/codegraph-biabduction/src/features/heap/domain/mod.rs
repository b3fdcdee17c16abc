//! Abstract heap domain types
//!
//! ```text
//! Sym          symbolic value; a location is the Sym of its base address
//! Value        Sym + offset | Int | Null
//! HeapCell     fields (functional points-to), validity, ownership edges
//! LocOrigin    what a location stands for (formal, local slot, heap cell, ...)
//! ```

pub mod cell;
pub mod location;
pub mod value;

pub use cell::{HeapCell, OwnershipEdge};
pub use location::{AbstractLocation, LocOrigin, Sym, ValidityTag};
pub use value::Value;
