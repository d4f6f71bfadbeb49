//! Knowledge-graph embedding training and filtered link-prediction
//! evaluation.
//!
//! Knowledge graphs store facts as (subject, relation, object) triples:
//! `(Einstein, won, NobelPrize)`, `(Paris, capitalOf, France)`. Embedding
//! models learn low-dimensional vectors for entities and relations where
//! geometric operations predict missing links; see [`ScoringFunction`] for
//! the geometries on offer.
//!
//! The crate covers the full loop:
//!
//! | Component | Role |
//! |-----------|------|
//! | [`EmbeddingModel`] | parameter tables, loss, analytic gradients |
//! | [`DistributedSampler`] | epoch-deterministic disjoint shards per worker |
//! | [`AllReduceGroup`] / [`DataParallel`] | gradient averaging across workers |
//! | [`DistributedTrainer`] | spawns workers, runs the epoch loop, reconciles the checkpoint |
//! | [`Evaluator`] | filtered Hits@K / MRR over the full vocabulary |
//! | [`export`] | CSV embeddings + JSON run configuration |
//!
//! # Training
//!
//! ```rust,ignore
//! use trellis_core::index_raw_triples;
//! use trellis_kge::{
//!     DistributedTrainer, EmbeddingModel, ScoringFunction, TrainingConfig,
//! };
//!
//! let (entities, relations, train) = index_raw_triples(&raw_triples);
//! let mut model = EmbeddingModel::new(
//!     ScoringFunction::TransE,
//!     entities.len(),
//!     relations.len(),
//!     128,
//!     42,
//! )?;
//!
//! let config = TrainingConfig::default()
//!     .with_epochs(100)
//!     .with_devices_per_node(4); // 4 workers, gradient-averaged
//! DistributedTrainer::new(config).fit(&mut model, &train)?;
//! println!("final loss: {:?}", model.loss_history.last());
//! ```
//!
//! Workers hold independent model replicas on disjoint data shards;
//! gradients are averaged across the group once per mini-batch, so every
//! replica applies identical updates and the trained parameters are the
//! same on all of them.
//!
//! # Evaluation
//!
//! ```rust,ignore
//! use trellis_kge::{Evaluator, RankingMode};
//!
//! // The completion index spans train + valid + test: anything known true.
//! let evaluator = Evaluator::from_partitions(&[&train_path, &valid_path, &test_path])?;
//! let metrics = evaluator.evaluate(&model, &test_triples, RankingMode::EntityRanking)?;
//! println!("{metrics}"); // MRR: 0.31 | H@1: 0.22 | H@3: 0.35 | H@10: 0.49
//! ```
//!
//! Filtering excludes known-true alternatives from each candidate ranking so
//! they cannot depress the query answer's rank; see [`evaluation`] for the
//! protocol details.
//!
//! # References
//!
//! - Bordes et al. (2013). "Translating Embeddings for Modeling
//!   Multi-relational Data." NIPS.
//! - Yang et al. (2015). "Embedding Entities and Relations for Learning
//!   and Inference in Knowledge Bases." ICLR.
//! - Trouillon et al. (2016). "Complex Embeddings for Simple Link
//!   Prediction." ICML.
//! - Sun et al. (2019). "RotatE: Knowledge Graph Embedding by Relational
//!   Rotation in Complex Space." ICLR.

mod error;
pub mod evaluation;
pub mod export;
mod model;
mod optim;
mod sampler;
mod scoring;
mod sync;
mod training;

pub use error::{Error, Result};
pub use evaluation::{Evaluator, RankMetrics, RankingMode};
pub use model::{EmbeddingModel, GradientBuffer, ModelState, ScoringTechnique};
pub use optim::{Optimizer, OptimizerKind};
pub use sampler::DistributedSampler;
pub use scoring::ScoringFunction;
pub use sync::{AllReduceGroup, DataParallel};
pub use training::{DistributedTrainer, EpochCallback, TrainingConfig};
