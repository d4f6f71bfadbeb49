//! Vocabulary indexing: raw identifiers to dense integer ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::TripleStore;
use crate::triple::Triple;

/// Bijective mapping from raw labels to dense ids.
///
/// Ids are assigned in insertion order, so the mapping is reproducible for a
/// fixed input ordering. After indexing, the vocabulary is shared read-only
/// across all workers and the evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    to_id: HashMap<String, u32>,
    labels: Vec<String>,
}

impl Vocabulary {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `label`, assigning the next dense id if unseen.
    pub fn intern(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.to_id.get(label) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.labels.push(label.to_string());
        self.to_id.insert(label.to_string(), id);
        id
    }

    /// Look up the id for a label.
    pub fn id(&self, label: &str) -> Option<u32> {
        self.to_id.get(label).copied()
    }

    /// Look up the label for an id.
    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    /// All labels in id order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Index raw string triples into dense ids.
///
/// Returns the entity vocabulary, the relation vocabulary, and the indexed
/// store, in that order. Entities are interned subject-first so the id
/// assignment matches a single left-to-right pass over the input.
pub fn index_raw_triples<S: AsRef<str>>(
    raw: &[(S, S, S)],
) -> (Vocabulary, Vocabulary, TripleStore) {
    let mut entities = Vocabulary::new();
    let mut relations = Vocabulary::new();
    let mut store = TripleStore::new();

    for (s, p, o) in raw {
        let subject = entities.intern(s.as_ref());
        let relation = relations.intern(p.as_ref());
        let object = entities.intern(o.as_ref());
        store.push(Triple::new(subject, relation, object));
    }

    (entities, relations, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut vocab = Vocabulary::new();
        let a = vocab.intern("alice");
        let b = vocab.intern("bob");
        assert_eq!(vocab.intern("alice"), a);
        assert_eq!(vocab.intern("bob"), b);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_bijective_roundtrip() {
        let mut vocab = Vocabulary::new();
        for label in ["x", "y", "z"] {
            vocab.intern(label);
        }
        for label in ["x", "y", "z"] {
            let id = vocab.id(label).unwrap();
            assert_eq!(vocab.label(id), Some(label));
        }
        assert_eq!(vocab.id("w"), None);
        assert_eq!(vocab.label(99), None);
    }

    #[test]
    fn test_index_raw_triples() {
        let raw = vec![
            ("alice", "knows", "bob"),
            ("bob", "knows", "carol"),
            ("alice", "worksAt", "acme"),
        ];
        let (entities, relations, store) = index_raw_triples(&raw);

        assert_eq!(entities.len(), 4);
        assert_eq!(relations.len(), 2);
        assert_eq!(store.len(), 3);

        let first = store.get(0).unwrap();
        assert_eq!(entities.label(first.subject), Some("alice"));
        assert_eq!(relations.label(first.relation), Some("knows"));
        assert_eq!(entities.label(first.object), Some("bob"));
    }
}
