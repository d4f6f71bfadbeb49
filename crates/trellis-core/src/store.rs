//! Columnar triple storage and the known-true completion index.
//!
//! Triples are stored as three parallel columns (subject, relation, object),
//! the layout the evaluation pipeline persists between runs: one file per
//! split (train/valid/test), loaded back and concatenated when the filtered
//! evaluator needs the union of everything known to be true.
//!
//! [`CompletionIndex`] inverts that union into pair-keyed lookups:
//!
//! | Key | Returns | Used by |
//! |--------|------------------|------------------------|
//! | (s, p) | all true objects | tail prediction filter |
//! | (p, o) | all true subjects | head prediction filter |
//! | (s, o) | all true relations | relation ranking filter |
//!
//! Both types are read-only after construction and safe to share across
//! threads without locking.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::triple::{EntityId, RelationId, Triple};

/// A columnar collection of triples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripleStore {
    subjects: Vec<EntityId>,
    relations: Vec<RelationId>,
    objects: Vec<EntityId>,
}

impl TripleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an iterator of triples.
    pub fn from_triples<I: IntoIterator<Item = Triple>>(triples: I) -> Self {
        let mut store = Self::new();
        for t in triples {
            store.push(t);
        }
        store
    }

    /// Append a triple.
    pub fn push(&mut self, t: Triple) {
        self.subjects.push(t.subject);
        self.relations.push(t.relation);
        self.objects.push(t.object);
    }

    /// Number of triples.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether the store holds no triples.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// The triple at `index`, if in bounds.
    pub fn get(&self, index: usize) -> Option<Triple> {
        if index >= self.len() {
            return None;
        }
        Some(Triple::new(
            self.subjects[index],
            self.relations[index],
            self.objects[index],
        ))
    }

    /// Iterate over all triples in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Triple> + '_ {
        (0..self.len()).map(move |i| {
            Triple::new(self.subjects[i], self.relations[i], self.objects[i])
        })
    }

    /// Collect into a plain vector of triples.
    pub fn to_vec(&self) -> Vec<Triple> {
        self.iter().collect()
    }

    /// One past the largest entity id referenced, 0 if empty.
    pub fn max_entity_bound(&self) -> u32 {
        self.subjects
            .iter()
            .chain(self.objects.iter())
            .copied()
            .max()
            .map_or(0, |m| m + 1)
    }

    /// One past the largest relation id referenced, 0 if empty.
    pub fn max_relation_bound(&self) -> u32 {
        self.relations.iter().copied().max().map_or(0, |m| m + 1)
    }

    /// Append all triples from `other`.
    pub fn extend_from(&mut self, other: &TripleStore) {
        self.subjects.extend_from_slice(&other.subjects);
        self.relations.extend_from_slice(&other.relations);
        self.objects.extend_from_slice(&other.objects);
    }

    /// Persist the columns as JSON at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a store previously written by [`TripleStore::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let store: Self = serde_json::from_reader(BufReader::new(file))?;
        if store.subjects.len() != store.relations.len()
            || store.subjects.len() != store.objects.len()
        {
            return Err(Error::ColumnMismatch(path.display().to_string()));
        }
        Ok(store)
    }

    /// Load and concatenate every partition that exists among `paths`.
    ///
    /// Missing files are skipped; at least one partition must load or the
    /// call fails with [`Error::NoPartitions`].
    pub fn load_partitions(paths: &[&Path]) -> Result<Self> {
        let mut merged = Self::new();
        let mut found = false;
        for path in paths {
            if !path.exists() {
                continue;
            }
            let part = Self::load(path)?;
            merged.extend_from(&part);
            found = true;
        }
        if !found {
            let joined = paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::NoPartitions(joined));
        }
        Ok(merged)
    }
}

impl FromIterator<Triple> for TripleStore {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        Self::from_triples(iter)
    }
}

/// Pair-keyed index over every triple known to be true.
///
/// Built once from the union of all splits; queried by the evaluator to
/// exclude alternative true completions from a candidate ranking. Never
/// consulted during gradient computation.
#[derive(Debug, Clone, Default)]
pub struct CompletionIndex {
    by_subject_relation: HashMap<(EntityId, RelationId), Vec<EntityId>>,
    by_relation_object: HashMap<(RelationId, EntityId), Vec<EntityId>>,
    by_subject_object: HashMap<(EntityId, EntityId), Vec<RelationId>>,
    num_triples: usize,
}

impl CompletionIndex {
    /// Build the index from one or more stores (typically train+valid+test).
    pub fn from_stores(stores: &[&TripleStore]) -> Self {
        let mut index = Self::default();
        for store in stores {
            for t in store.iter() {
                index
                    .by_subject_relation
                    .entry((t.subject, t.relation))
                    .or_default()
                    .push(t.object);
                index
                    .by_relation_object
                    .entry((t.relation, t.object))
                    .or_default()
                    .push(t.subject);
                index
                    .by_subject_object
                    .entry((t.subject, t.object))
                    .or_default()
                    .push(t.relation);
                index.num_triples += 1;
            }
        }
        index
    }

    /// All objects o such that (s, p, o) is known true.
    pub fn objects_for(&self, s: EntityId, p: RelationId) -> &[EntityId] {
        self.by_subject_relation
            .get(&(s, p))
            .map_or(&[], Vec::as_slice)
    }

    /// All subjects s such that (s, p, o) is known true.
    pub fn subjects_for(&self, p: RelationId, o: EntityId) -> &[EntityId] {
        self.by_relation_object
            .get(&(p, o))
            .map_or(&[], Vec::as_slice)
    }

    /// All relations p such that (s, p, o) is known true.
    pub fn relations_for(&self, s: EntityId, o: EntityId) -> &[RelationId] {
        self.by_subject_object
            .get(&(s, o))
            .map_or(&[], Vec::as_slice)
    }

    /// Total number of triples indexed.
    pub fn num_triples(&self) -> usize {
        self.num_triples
    }

    /// Whether no triples have been indexed.
    pub fn is_empty(&self) -> bool {
        self.num_triples == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> TripleStore {
        TripleStore::from_triples([
            Triple::new(0, 0, 1),
            Triple::new(0, 0, 2),
            Triple::new(1, 0, 2),
            Triple::new(0, 1, 2),
        ])
    }

    #[test]
    fn test_columnar_roundtrip() {
        let store = sample_store();
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(1), Some(Triple::new(0, 0, 2)));
        assert_eq!(store.get(4), None);
        assert_eq!(store.to_vec().len(), 4);
    }

    #[test]
    fn test_bounds() {
        let store = sample_store();
        assert_eq!(store.max_entity_bound(), 3);
        assert_eq!(store.max_relation_bound(), 2);
        assert_eq!(TripleStore::new().max_entity_bound(), 0);
    }

    #[test]
    fn test_save_load() {
        let store = sample_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        store.save(&path).unwrap();

        let loaded = TripleStore::load(&path).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_load_partitions_skips_missing() {
        let store = sample_store();
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.json");
        let valid = dir.path().join("valid.json");
        store.save(&train).unwrap();

        let merged = TripleStore::load_partitions(&[&train, &valid]).unwrap();
        assert_eq!(merged.len(), store.len());
    }

    #[test]
    fn test_load_partitions_all_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = TripleStore::load_partitions(&[&missing]).unwrap_err();
        assert!(matches!(err, Error::NoPartitions(_)));
    }

    #[test]
    fn test_completion_index_lookups() {
        let store = sample_store();
        let index = CompletionIndex::from_stores(&[&store]);

        assert_eq!(index.objects_for(0, 0), &[1, 2]);
        assert_eq!(index.subjects_for(0, 2), &[0, 1]);
        assert_eq!(index.relations_for(0, 2), &[0, 1]);
        assert_eq!(index.objects_for(5, 5), &[] as &[u32]);
        assert_eq!(index.num_triples(), 4);
    }

    #[test]
    fn test_completion_index_multiple_stores() {
        let train = TripleStore::from_triples([Triple::new(0, 0, 1)]);
        let test = TripleStore::from_triples([Triple::new(0, 0, 2)]);
        let index = CompletionIndex::from_stores(&[&train, &test]);

        assert_eq!(index.objects_for(0, 0), &[1, 2]);
    }
}
