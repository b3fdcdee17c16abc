//! Summary store and call resolution
//!
//! Summaries are published once per `(procedure, generation, round)` and
//! never mutated afterwards. Readers hold `Arc<Summary>` handles, so a
//! caller analyzing against a published summary is never affected by later
//! publications.
//!
//! ```text
//! SummaryStore      append-only, keyed by (procedure, generation, round)
//! SummaryLookup     what an analysis may see while running
//!   GenerationView  finals of earlier SCCs + previous-round partials
//! CallResolver      subtract callee pre, instantiate callee post
//! ```

pub mod lookup;
pub mod resolver;
pub mod store;

pub use lookup::{GenerationView, NoSummaries, SummaryLookup};
pub use resolver::CallResolver;
pub use store::{Round, SummaryKey, SummaryStore};
