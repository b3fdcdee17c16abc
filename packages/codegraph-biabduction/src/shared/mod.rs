//! Shared models consumed from the frontend
//!
//! Everything here is produced outside the engine (CFG construction and
//! call-graph extraction are external collaborators); the engine only reads it.

pub mod models;
