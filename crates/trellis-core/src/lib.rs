//! Core data types for the trellis knowledge-graph stack.
//!
//! A knowledge graph stores facts as (subject, relation, object) triples.
//! Downstream crates work exclusively on dense integer ids, so this crate
//! provides the three pieces everything else builds on:
//!
//! - [`Triple`] — a fact as a tuple of dense ids
//! - [`Vocabulary`] — the bijective label ↔ id mapping, fixed for a run
//! - [`TripleStore`] — a columnar triple collection with split persistence
//! - [`CompletionIndex`] — lookups from a fixed pair to its known completions
//!
//! The completion index is what makes *filtered* link-prediction evaluation
//! possible: given `(s, p)` it returns every object known to form a true
//! triple, so an evaluator can exclude them from a candidate ranking.

mod error;
mod store;
mod triple;
mod vocab;

pub use error::{Error, Result};
pub use store::{CompletionIndex, TripleStore};
pub use triple::{EntityId, RelationId, Triple};
pub use vocab::{index_raw_triples, Vocabulary};
