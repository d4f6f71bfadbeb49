//! Filtered rank-based evaluation for link prediction.
//!
//! Given a held-out triple (s, p, o), the standard protocol asks two
//! questions: where does o rank among all candidate objects for (s, p, ?),
//! and where does s rank among all candidate subjects for (?, p, o)?
//!
//! # Filtered vs raw
//!
//! A knowledge graph usually contains several true completions for the same
//! pair — (s, p) may hold for many objects. Ranking raw scores punishes the
//! model for predicting those *other true* completions above the query's
//! answer. The filtered protocol excludes every known-true alternative from
//! the candidate list (their scores are set to −∞) while the query's own
//! answer keeps its score untouched.
//!
//! # Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MRR | (0, 1] | mean of 1/rank over all samples |
//! | Hits@1 | [0, 1] | fraction of ranks = 1 |
//! | Hits@3 | [0, 1] | fraction of ranks ≤ 3 |
//! | Hits@10 | [0, 1] | fraction of ranks ≤ 10 |
//!
//! Entity ranking counts head and tail ranks separately, so the denominator
//! is twice the query count; relation ranking contributes one rank per
//! query.
//!
//! # Determinism
//!
//! Filtering is a pure function producing a fresh score vector, ranks come
//! from a stable descending sort (ties resolve to the lower candidate id —
//! implementation-defined, not contractual), queries may be scored in
//! parallel but are collected in query order and aggregated sequentially.
//! Evaluating the same model twice on the same queries yields bit-identical
//! metrics.

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use trellis_core::{CompletionIndex, Triple, TripleStore};

use crate::error::{Error, Result};
use crate::model::EmbeddingModel;

/// Which vocabulary the candidates are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingMode {
    /// Rank candidate subjects and objects (two ranks per query).
    EntityRanking,
    /// Rank candidate relations (one rank per query).
    RelationRanking,
}

/// Aggregated rank metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankMetrics {
    /// Fraction of ranks equal to 1.
    #[serde(rename = "H@1")]
    pub hits_at_1: f64,
    /// Fraction of ranks at most 3.
    #[serde(rename = "H@3")]
    pub hits_at_3: f64,
    /// Fraction of ranks at most 10.
    #[serde(rename = "H@10")]
    pub hits_at_10: f64,
    /// Mean reciprocal rank.
    #[serde(rename = "MRR")]
    pub mrr: f64,
    /// Number of (triple, direction) samples aggregated.
    pub num_samples: usize,
}

impl RankMetrics {
    /// Aggregate a list of 1-based ranks.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }
        let n = ranks.len() as f64;
        Self {
            hits_at_1: ranks.iter().filter(|&&r| r == 1).count() as f64 / n,
            hits_at_3: ranks.iter().filter(|&&r| r <= 3).count() as f64 / n,
            hits_at_10: ranks.iter().filter(|&&r| r <= 10).count() as f64 / n,
            mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            num_samples: ranks.len(),
        }
    }

    /// The metrics as a plain key → value mapping.
    pub fn to_map(&self) -> HashMap<&'static str, f64> {
        HashMap::from([
            ("H@1", self.hits_at_1),
            ("H@3", self.hits_at_3),
            ("H@10", self.hits_at_10),
            ("MRR", self.mrr),
        ])
    }
}

impl std::fmt::Display for RankMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MRR: {:.4} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.hits_at_1, self.hits_at_3, self.hits_at_10, self.num_samples
        )
    }
}

/// Filtered link-prediction evaluator.
///
/// Holds the completion index over every triple known to be true
/// (train + valid + test). The index is read-only; evaluation borrows the
/// model immutably, so neither parameters nor the index can change under a
/// running evaluation.
#[derive(Debug)]
pub struct Evaluator {
    index: CompletionIndex,
}

impl Evaluator {
    /// Create an evaluator from a prebuilt completion index.
    pub fn new(index: CompletionIndex) -> Self {
        Self { index }
    }

    /// Build the index from the splits present among `paths`
    /// (missing partitions are skipped, none at all is an error).
    pub fn from_partitions(paths: &[&Path]) -> Result<Self> {
        let merged = TripleStore::load_partitions(paths).map_err(|e| match e {
            trellis_core::Error::NoPartitions(msg) => Error::EvaluationData(format!(
                "completion index needs at least one persisted partition: {msg}"
            )),
            trellis_core::Error::Io(e) => Error::Io(e),
            trellis_core::Error::Serialization(e) => Error::Serialization(e),
            trellis_core::Error::ColumnMismatch(msg) => {
                Error::EvaluationData(format!("corrupt partition: {msg}"))
            }
        })?;
        Ok(Self::new(CompletionIndex::from_stores(&[&merged])))
    }

    /// The underlying completion index.
    pub fn index(&self) -> &CompletionIndex {
        &self.index
    }

    /// Rank every query triple against the vocabulary and aggregate.
    ///
    /// Fails with [`Error::EvaluationData`] if the index is empty or any
    /// query references an id outside the model's vocabularies; a failure
    /// here leaves previously computed metric sets untouched.
    pub fn evaluate(
        &self,
        model: &EmbeddingModel,
        queries: &[Triple],
        mode: RankingMode,
    ) -> Result<RankMetrics> {
        if self.index.is_empty() {
            return Err(Error::EvaluationData(
                "completion index holds no known triples".into(),
            ));
        }
        for &query in queries {
            model.check_triple(query)?;
        }

        let ranks: Vec<usize> = match mode {
            RankingMode::EntityRanking => {
                let per_query: Vec<(usize, usize)> = queries
                    .par_iter()
                    .map(|&q| -> Result<(usize, usize)> {
                        let scores = model.score_objects(q.subject, q.relation)?;
                        let filtered = masked_scores(
                            &scores,
                            self.index.objects_for(q.subject, q.relation),
                            q.object,
                        );
                        let tail_rank = rank_of(&filtered, q.object);

                        let scores = model.score_subjects(q.relation, q.object)?;
                        let filtered = masked_scores(
                            &scores,
                            self.index.subjects_for(q.relation, q.object),
                            q.subject,
                        );
                        let head_rank = rank_of(&filtered, q.subject);

                        Ok((head_rank, tail_rank))
                    })
                    .collect::<Result<_>>()?;

                let mut ranks = Vec::with_capacity(per_query.len() * 2);
                for (head_rank, tail_rank) in per_query {
                    ranks.push(head_rank);
                    ranks.push(tail_rank);
                }
                ranks
            }
            RankingMode::RelationRanking => queries
                .par_iter()
                .map(|&q| -> Result<usize> {
                    let scores = model.score_relations(q.subject, q.object)?;
                    let filtered = masked_scores(
                        &scores,
                        self.index.relations_for(q.subject, q.object),
                        q.relation,
                    );
                    Ok(rank_of(&filtered, q.relation))
                })
                .collect::<Result<_>>()?,
        };

        let metrics = RankMetrics::from_ranks(&ranks);
        tracing::info!(?mode, %metrics, queries = queries.len(), "evaluation complete");
        Ok(metrics)
    }
}

/// Produce a fresh score vector with every known-true candidate other than
/// `target` excluded. The input is never modified and the target's score is
/// never altered.
fn masked_scores(scores: &[f32], known_true: &[u32], target: u32) -> Vec<f32> {
    let mut masked = scores.to_vec();
    for &id in known_true {
        if id != target {
            if let Some(score) = masked.get_mut(id as usize) {
                *score = f32::NEG_INFINITY;
            }
        }
    }
    masked
}

/// 1-based rank of `target` in a stable descending sort of `scores`.
///
/// Among tied scores the lower candidate id sorts first.
fn rank_of(scores: &[f32], target: u32) -> usize {
    let mut order: Vec<u32> = (0..scores.len() as u32).collect();
    order.sort_by(|&a, &b| {
        scores[b as usize]
            .partial_cmp(&scores[a as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
        .iter()
        .position(|&id| id == target)
        .map_or(scores.len(), |p| p + 1)
}
