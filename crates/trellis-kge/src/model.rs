//! Trainable embedding model: entity/relation parameter tables plus the
//! loss and gradient entry points the training loop drives.
//!
//! The model is a pair of dense tables (`num_entities × dim` and
//! `num_relations × dim`) interpreted by a [`ScoringFunction`]. Two
//! labelling techniques are supported:
//!
//! - [`ScoringTechnique::NegSample`]: margin ranking loss against corrupted
//!   triples (head and tail corrupted alternately, deterministic per seed).
//! - [`ScoringTechnique::KvsAll`]: each (subject, relation) pair is scored
//!   against every entity and trained with binary cross-entropy against the
//!   multi-hot set of true objects from the training split.
//!
//! Gradients accumulate into a [`GradientBuffer`], a single flat vector so a
//! worker group can average it in one collective call. Scoring never needs
//! gradient state: every inference entry point takes `&self`, so holding a
//! shared reference is all the "inference mode" a caller needs.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use trellis_core::{CompletionIndex, EntityId, RelationId, Triple};

use crate::error::{Error, Result};
use crate::scoring::ScoringFunction;

/// How training examples are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringTechnique {
    /// Margin ranking against sampled corrupted triples.
    NegSample,
    /// One-vs-all binary cross-entropy over the full entity vocabulary.
    KvsAll,
}

/// Flat gradient storage for one model replica.
///
/// Entity gradients occupy the front of the vector, relation gradients the
/// back, so [`GradientBuffer::as_mut_slice`] exposes everything a collective
/// average needs as one contiguous buffer.
#[derive(Debug, Clone)]
pub struct GradientBuffer {
    data: Vec<f32>,
    entity_len: usize,
    dim: usize,
}

impl GradientBuffer {
    /// Allocate a zeroed buffer shaped for `model`.
    pub fn for_model(model: &EmbeddingModel) -> Self {
        let entity_len = model.num_entities() * model.dim();
        let relation_len = model.num_relations() * model.dim();
        Self {
            data: vec![0.0; entity_len + relation_len],
            entity_len,
            dim: model.dim(),
        }
    }

    /// Reset all gradients to zero.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// The whole buffer, for collective averaging.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Entity-table gradients.
    pub fn entity(&self) -> &[f32] {
        &self.data[..self.entity_len]
    }

    /// Relation-table gradients.
    pub fn relation(&self) -> &[f32] {
        &self.data[self.entity_len..]
    }

    /// Total number of gradient values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Multiply every gradient by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for g in &mut self.data {
            *g *= factor;
        }
    }

    fn entity_row_mut(&mut self, id: EntityId) -> &mut [f32] {
        let start = id as usize * self.dim;
        &mut self.data[start..start + self.dim]
    }

    fn relation_row_mut(&mut self, id: RelationId) -> &mut [f32] {
        let start = self.entity_len + id as usize * self.dim;
        &mut self.data[start..start + self.dim]
    }
}

/// Serializable parameter snapshot, the checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    scoring: ScoringFunction,
    dim: usize,
    num_entities: usize,
    num_relations: usize,
    entity: Vec<f32>,
    relation: Vec<f32>,
}

/// Knowledge-graph embedding model.
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    scoring: ScoringFunction,
    dim: usize,
    entity: Array2<f32>,
    relation: Array2<f32>,
    /// Per-epoch mean training losses, attached by the trainer.
    pub loss_history: Vec<f32>,
}

impl EmbeddingModel {
    /// Create a model with seeded, row-normalized random tables.
    ///
    /// The same seed always produces the same initialization, so every
    /// worker replica starts from identical parameters without any
    /// broadcast.
    pub fn new(
        scoring: ScoringFunction,
        num_entities: usize,
        num_relations: usize,
        dim: usize,
        seed: u64,
    ) -> Result<Self> {
        if num_entities == 0 || num_relations == 0 {
            return Err(Error::Config(
                "model requires at least one entity and one relation".into(),
            ));
        }
        if dim == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        if scoring.requires_even_dim() && dim % 2 != 0 {
            return Err(Error::Config(format!(
                "{scoring} operates on complex pairs and needs an even dimension, got {dim}"
            )));
        }

        let mut rng = XorShiftRng::seed_from_u64(seed);
        let entity = init_table(&mut rng, num_entities, dim);
        let relation = init_table(&mut rng, num_relations, dim);

        Ok(Self {
            scoring,
            dim,
            entity,
            relation,
            loss_history: Vec::new(),
        })
    }

    /// Build a model from pre-trained tables.
    pub fn from_embeddings(
        scoring: ScoringFunction,
        entity: Array2<f32>,
        relation: Array2<f32>,
    ) -> Result<Self> {
        let dim = entity.ncols();
        if dim == 0 || entity.nrows() == 0 || relation.nrows() == 0 {
            return Err(Error::Config("embedding tables must be non-empty".into()));
        }
        if relation.ncols() != dim {
            return Err(Error::Config(format!(
                "relation table has dimension {} but entity table has {}",
                relation.ncols(),
                dim
            )));
        }
        if scoring.requires_even_dim() && dim % 2 != 0 {
            return Err(Error::Config(format!(
                "{scoring} operates on complex pairs and needs an even dimension, got {dim}"
            )));
        }
        Ok(Self {
            scoring,
            dim,
            entity: entity.as_standard_layout().to_owned(),
            relation: relation.as_standard_layout().to_owned(),
            loss_history: Vec::new(),
        })
    }

    /// The scoring function this model is trained under.
    pub fn scoring(&self) -> ScoringFunction {
        self.scoring
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of entities.
    pub fn num_entities(&self) -> usize {
        self.entity.nrows()
    }

    /// Number of relations.
    pub fn num_relations(&self) -> usize {
        self.relation.nrows()
    }

    pub(crate) fn entity_flat(&self) -> &[f32] {
        self.entity.as_slice().expect("entity table is contiguous")
    }

    pub(crate) fn relation_flat(&self) -> &[f32] {
        self.relation
            .as_slice()
            .expect("relation table is contiguous")
    }

    /// The embedding vector for an entity.
    pub fn entity_embedding(&self, id: EntityId) -> Result<&[f32]> {
        if id as usize >= self.num_entities() {
            return Err(Error::EvaluationData(format!(
                "entity id {id} is outside the vocabulary of {}",
                self.num_entities()
            )));
        }
        Ok(self.entity_row(id))
    }

    /// The embedding vector for a relation.
    pub fn relation_embedding(&self, id: RelationId) -> Result<&[f32]> {
        if id as usize >= self.num_relations() {
            return Err(Error::EvaluationData(format!(
                "relation id {id} is outside the vocabulary of {}",
                self.num_relations()
            )));
        }
        Ok(self.relation_row(id))
    }

    /// Entity parameters as one flat slice, for optimizer steps.
    pub fn entity_params_mut(&mut self) -> &mut [f32] {
        self.entity
            .as_slice_mut()
            .expect("entity table is contiguous")
    }

    /// Relation parameters as one flat slice, for optimizer steps.
    pub fn relation_params_mut(&mut self) -> &mut [f32] {
        self.relation
            .as_slice_mut()
            .expect("relation table is contiguous")
    }

    fn entity_row(&self, id: EntityId) -> &[f32] {
        let start = id as usize * self.dim;
        &self.entity_flat()[start..start + self.dim]
    }

    fn relation_row(&self, id: RelationId) -> &[f32] {
        let start = id as usize * self.dim;
        &self.relation_flat()[start..start + self.dim]
    }

    /// Verify every id in `t` is inside this model's vocabularies.
    pub fn check_triple(&self, t: Triple) -> Result<()> {
        if t.subject as usize >= self.num_entities() || t.object as usize >= self.num_entities() {
            return Err(Error::EvaluationData(format!(
                "triple ({}, {}, {}) references an entity outside the vocabulary of {}",
                t.subject,
                t.relation,
                t.object,
                self.num_entities()
            )));
        }
        if t.relation as usize >= self.num_relations() {
            return Err(Error::EvaluationData(format!(
                "triple ({}, {}, {}) references a relation outside the vocabulary of {}",
                t.subject,
                t.relation,
                t.object,
                self.num_relations()
            )));
        }
        Ok(())
    }

    /// Score a single triple. Higher is more plausible.
    pub fn score_triple(&self, t: Triple) -> Result<f32> {
        self.check_triple(t)?;
        Ok(self.raw_score(t))
    }

    fn raw_score(&self, t: Triple) -> f32 {
        self.scoring.score(
            self.entity_row(t.subject),
            self.relation_row(t.relation),
            self.entity_row(t.object),
        )
    }

    /// Scores for (s, p, ?) over every candidate object.
    pub fn score_objects(&self, s: EntityId, p: RelationId) -> Result<Vec<f32>> {
        self.check_triple(Triple::new(s, p, 0))?;
        let h = self.entity_row(s);
        let r = self.relation_row(p);
        Ok((0..self.num_entities())
            .map(|i| self.scoring.score(h, r, self.entity_row(i as EntityId)))
            .collect())
    }

    /// Scores for (?, p, o) over every candidate subject.
    pub fn score_subjects(&self, p: RelationId, o: EntityId) -> Result<Vec<f32>> {
        self.check_triple(Triple::new(0, p, o))?;
        let r = self.relation_row(p);
        let t = self.entity_row(o);
        Ok((0..self.num_entities())
            .map(|i| self.scoring.score(self.entity_row(i as EntityId), r, t))
            .collect())
    }

    /// Scores for (s, ?, o) over every candidate relation.
    pub fn score_relations(&self, s: EntityId, o: EntityId) -> Result<Vec<f32>> {
        self.check_triple(Triple::new(s, 0, o))?;
        let h = self.entity_row(s);
        let t = self.entity_row(o);
        Ok((0..self.num_relations())
            .map(|i| self.scoring.score(h, self.relation_row(i as RelationId), t))
            .collect())
    }

    /// Compute the batch loss and accumulate gradients into `grads`.
    ///
    /// `targets` carries the training-split completion index and is required
    /// only under [`ScoringTechnique::KvsAll`]. The returned loss is the mean
    /// over the batch's evaluated samples.
    pub fn backward(
        &self,
        batch: &[Triple],
        technique: ScoringTechnique,
        margin: f32,
        neg_ratio: usize,
        targets: Option<&CompletionIndex>,
        rng: &mut XorShiftRng,
        grads: &mut GradientBuffer,
    ) -> Result<f32> {
        if !self.scoring.is_trainable() {
            return Err(Error::Config(format!(
                "{} has no gradient implementation and cannot be trained",
                self.scoring
            )));
        }
        match technique {
            ScoringTechnique::NegSample => self.margin_backward(batch, margin, neg_ratio, rng, grads),
            ScoringTechnique::KvsAll => {
                if !self.scoring.supports_one_vs_all() {
                    return Err(Error::Config(format!(
                        "{} cannot be trained one-vs-all",
                        self.scoring
                    )));
                }
                let targets = targets.ok_or_else(|| {
                    Error::Config("one-vs-all training requires the training-split index".into())
                })?;
                self.one_vs_all_backward(batch, targets, grads)
            }
        }
    }

    /// Margin ranking loss with alternating head/tail corruption.
    fn margin_backward(
        &self,
        batch: &[Triple],
        margin: f32,
        neg_ratio: usize,
        rng: &mut XorShiftRng,
        grads: &mut GradientBuffer,
    ) -> Result<f32> {
        let num_entities = self.num_entities() as u32;
        let mut total = 0.0;
        let mut count = 0usize;

        for &t in batch {
            let pos_score = self.raw_score(t);
            for k in 0..neg_ratio {
                let candidate = rng.gen_range(0..num_entities);
                let neg = if k % 2 == 0 {
                    Triple::new(t.subject, t.relation, candidate)
                } else {
                    Triple::new(candidate, t.relation, t.object)
                };
                if neg == t {
                    continue;
                }

                let neg_score = self.raw_score(neg);
                let loss = margin - pos_score + neg_score;
                count += 1;
                if loss > 0.0 {
                    total += loss;
                    // dL/ds_pos = -1, dL/ds_neg = +1 while the hinge is active.
                    self.add_score_gradients(t, -1.0, grads);
                    self.add_score_gradients(neg, 1.0, grads);
                }
            }
        }

        if count > 0 {
            let inv = 1.0 / count as f32;
            grads.scale(inv);
            total *= inv;
        }
        Ok(total)
    }

    /// Accumulate `coeff * ∂score/∂θ` for every parameter `t` touches.
    fn add_score_gradients(&self, t: Triple, coeff: f32, grads: &mut GradientBuffer) {
        match self.scoring {
            ScoringFunction::TransE => {
                let h = self.entity_row(t.subject);
                let r = self.relation_row(t.relation);
                let o = self.entity_row(t.object);

                // score = -||h + r - t||; gradient flows through the unit diff.
                let mut unit: Vec<f32> = (0..self.dim).map(|i| h[i] + r[i] - o[i]).collect();
                let norm = unit.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-8);
                for u in &mut unit {
                    *u /= norm;
                }

                let row = grads.entity_row_mut(t.subject);
                for i in 0..unit.len() {
                    row[i] += coeff * -unit[i];
                }
                let row = grads.relation_row_mut(t.relation);
                for i in 0..unit.len() {
                    row[i] += coeff * -unit[i];
                }
                let row = grads.entity_row_mut(t.object);
                for i in 0..unit.len() {
                    row[i] += coeff * unit[i];
                }
            }
            ScoringFunction::DistMult => {
                let h: Vec<f32> = self.entity_row(t.subject).to_vec();
                let r: Vec<f32> = self.relation_row(t.relation).to_vec();
                let o: Vec<f32> = self.entity_row(t.object).to_vec();

                let row = grads.entity_row_mut(t.subject);
                for i in 0..h.len() {
                    row[i] += coeff * r[i] * o[i];
                }
                let row = grads.relation_row_mut(t.relation);
                for i in 0..h.len() {
                    row[i] += coeff * h[i] * o[i];
                }
                let row = grads.entity_row_mut(t.object);
                for i in 0..h.len() {
                    row[i] += coeff * h[i] * r[i];
                }
            }
            // Unreachable behind the is_trainable gate in backward().
            ScoringFunction::RotatE | ScoringFunction::ComplEx => {}
        }
    }

    /// Binary cross-entropy against the multi-hot true-object vector.
    fn one_vs_all_backward(
        &self,
        batch: &[Triple],
        targets: &CompletionIndex,
        grads: &mut GradientBuffer,
    ) -> Result<f32> {
        let ne = self.num_entities();
        let inv_ne = 1.0 / ne as f32;
        let mut total = 0.0;

        for &t in batch {
            let h: Vec<f32> = self.entity_row(t.subject).to_vec();
            let r: Vec<f32> = self.relation_row(t.relation).to_vec();
            let hr: Vec<f32> = h.iter().zip(&r).map(|(a, b)| a * b).collect();

            let mut label = vec![false; ne];
            for &o in targets.objects_for(t.subject, t.relation) {
                label[o as usize] = true;
            }

            // Residuals d_i = (σ(score_i) - y_i) / ne drive every gradient.
            let mut residual = vec![0.0f32; ne];
            let mut sample_loss = 0.0;
            for i in 0..ne {
                let row = self.entity_row(i as EntityId);
                let score: f32 = row.iter().zip(&hr).map(|(a, b)| a * b).sum();
                let prob = sigmoid(score);
                let y = if label[i] { 1.0 } else { 0.0 };
                let clamped = prob.clamp(1e-7, 1.0 - 1e-7);
                sample_loss -= y * clamped.ln() + (1.0 - y) * (1.0 - clamped).ln();
                residual[i] = (prob - y) * inv_ne;
            }
            total += sample_loss * inv_ne;

            // d score_i / d t_i = h∘r; chain through residuals.
            let mut et_residual = vec![0.0f32; self.dim];
            for i in 0..ne {
                let row: Vec<f32> = self.entity_row(i as EntityId).to_vec();
                let d = residual[i];
                let grow = grads.entity_row_mut(i as EntityId);
                for j in 0..row.len() {
                    grow[j] += d * hr[j];
                    et_residual[j] += d * row[j];
                }
            }
            let grow = grads.entity_row_mut(t.subject);
            for j in 0..et_residual.len() {
                grow[j] += r[j] * et_residual[j];
            }
            let grow = grads.relation_row_mut(t.relation);
            for j in 0..et_residual.len() {
                grow[j] += h[j] * et_residual[j];
            }
        }

        let n = batch.len().max(1) as f32;
        grads.scale(1.0 / n);
        Ok(total / n)
    }

    /// Snapshot the parameters for checkpointing.
    pub fn state(&self) -> ModelState {
        ModelState {
            scoring: self.scoring,
            dim: self.dim,
            num_entities: self.num_entities(),
            num_relations: self.num_relations(),
            entity: self.entity_flat().to_vec(),
            relation: self.relation_flat().to_vec(),
        }
    }

    /// Replace this model's parameters from a snapshot of the same shape.
    pub fn load_state(&mut self, state: ModelState) -> Result<()> {
        if state.scoring != self.scoring
            || state.dim != self.dim
            || state.num_entities != self.num_entities()
            || state.num_relations != self.num_relations()
        {
            return Err(Error::Config(format!(
                "checkpoint shape mismatch: {} {}x{}/{}x{} vs {} {}x{}/{}x{}",
                state.scoring,
                state.num_entities,
                state.dim,
                state.num_relations,
                state.dim,
                self.scoring,
                self.num_entities(),
                self.dim,
                self.num_relations(),
                self.dim,
            )));
        }
        self.entity = Array2::from_shape_vec((state.num_entities, state.dim), state.entity)
            .map_err(|e| Error::Config(format!("corrupt entity table in checkpoint: {e}")))?;
        self.relation = Array2::from_shape_vec((state.num_relations, state.dim), state.relation)
            .map_err(|e| Error::Config(format!("corrupt relation table in checkpoint: {e}")))?;
        Ok(())
    }

    /// Serialize the parameter snapshot as JSON at `path`.
    pub fn save_state_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), &self.state())?;
        Ok(())
    }

    /// Load parameters previously written by [`EmbeddingModel::save_state_file`].
    pub fn load_state_file(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let state: ModelState = serde_json::from_reader(BufReader::new(file))?;
        self.load_state(state)
    }
}

fn init_table(rng: &mut XorShiftRng, rows: usize, dim: usize) -> Array2<f32> {
    let mut table = Array2::zeros((rows, dim));
    for mut row in table.rows_mut() {
        for v in row.iter_mut() {
            *v = rng.gen_range(-0.5..0.5);
        }
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-8 {
            row.mapv_inplace(|x| x / norm);
        }
    }
    table
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
