//! Multi-worker training loop for knowledge-graph embeddings.
//!
//! [`DistributedTrainer::fit`] drives the whole launch:
//!
//! 1. sanity-check the configuration (clamping, technique fallback);
//! 2. spawn one worker per device, each owning a full model replica;
//! 3. every worker joins the group rendezvous, shards the epoch permutation
//!    by rank, and runs the batch loop — gradients are averaged across the
//!    group after every backward pass, so replicas apply identical updates
//!    and never drift;
//! 4. rank 0 reports per-epoch losses over a channel and runs epoch-end
//!    callbacks;
//! 5. after the final epoch rank 0 writes its parameters to a temporary
//!    checkpoint, which the coordinator loads back into the caller's model
//!    before deleting it.
//!
//! Any worker failure poisons the group (releasing blocked peers), tears the
//! launch down and surfaces as an error from `fit`. Nothing is retried and
//! partial results are discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use trellis_core::{CompletionIndex, Triple, TripleStore};

use crate::error::{Error, Result};
use crate::model::{EmbeddingModel, GradientBuffer, ScoringTechnique};
use crate::optim::OptimizerKind;
use crate::sampler::DistributedSampler;
use crate::scoring::ScoringFunction;
use crate::sync::{AllReduceGroup, DataParallel};

/// Hook invoked by rank 0 after each epoch, with the unwrapped model.
pub trait EpochCallback: Send + Sync {
    fn on_epoch_end(&self, model: &EmbeddingModel, epoch: usize, mean_loss: f32);
}

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training epochs (default: 100).
    pub epochs: usize,
    /// Mini-batch size per worker (default: 512). Clamped to the training
    /// set size when larger.
    pub batch_size: usize,
    /// Learning rate (default: 0.001).
    pub learning_rate: f32,
    /// Margin for ranking loss (default: 1.0).
    pub margin: f32,
    /// Negative samples per positive under negative sampling (default: 5).
    pub neg_ratio: usize,
    /// Random seed for init, shuffling and corruption (default: 42).
    pub seed: u64,
    /// Node count (default: 1).
    pub num_nodes: usize,
    /// Devices per node; workers = nodes × devices (default: 1).
    pub devices_per_node: usize,
    /// Labelling technique (default: negative sampling).
    pub technique: ScoringTechnique,
    /// Optimizer (default: Adam).
    pub optimizer: OptimizerKind,
    /// Bound on every rendezvous and collective wait (default: 30 s).
    pub sync_timeout: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 512,
            learning_rate: 0.001,
            margin: 1.0,
            neg_ratio: 5,
            seed: 42,
            num_nodes: 1,
            devices_per_node: 1,
            technique: ScoringTechnique::NegSample,
            optimizer: OptimizerKind::Adam,
            sync_timeout: Duration::from_secs(30),
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_neg_ratio(mut self, neg_ratio: usize) -> Self {
        self.neg_ratio = neg_ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_nodes(mut self, num_nodes: usize) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    pub fn with_devices_per_node(mut self, devices: usize) -> Self {
        self.devices_per_node = devices;
        self
    }

    pub fn with_technique(mut self, technique: ScoringTechnique) -> Self {
        self.technique = technique;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Total worker count: nodes × devices per node.
    pub fn num_workers(&self) -> usize {
        self.num_nodes * self.devices_per_node
    }

    /// Validate against the model and training set, returning the corrected
    /// configuration actually used for the launch.
    pub(crate) fn sanitized(
        &self,
        scoring: ScoringFunction,
        train_len: usize,
    ) -> Result<TrainingConfig> {
        let mut cfg = self.clone();

        if cfg.num_workers() == 0 {
            return Err(Error::Config(
                "worker count (nodes × devices per node) must be at least 1".into(),
            ));
        }
        if cfg.epochs == 0 {
            return Err(Error::Config("epoch count must be at least 1".into()));
        }
        if cfg.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".into()));
        }
        if train_len == 0 {
            return Err(Error::Config("training set is empty".into()));
        }
        if !scoring.is_trainable() {
            return Err(Error::Config(format!(
                "{scoring} has no gradient implementation and cannot be trained"
            )));
        }

        if cfg.batch_size > train_len {
            tracing::warn!(
                batch_size = cfg.batch_size,
                train_len,
                "batch size exceeds the training set; clamping"
            );
            cfg.batch_size = train_len;
        }

        if cfg.technique == ScoringTechnique::KvsAll && !scoring.supports_one_vs_all() {
            tracing::warn!(
                %scoring,
                "scoring function cannot be trained one-vs-all; falling back to negative sampling"
            );
            cfg.technique = ScoringTechnique::NegSample;
            if cfg.neg_ratio == 0 {
                cfg.neg_ratio = 1;
            }
        }

        if cfg.technique == ScoringTechnique::NegSample && cfg.neg_ratio == 0 {
            return Err(Error::Config(
                "negative sampling requires a positive negative-sample ratio".into(),
            ));
        }

        Ok(cfg)
    }
}

/// Orchestrates a group of workers training identical model replicas on
/// disjoint shards.
pub struct DistributedTrainer {
    config: TrainingConfig,
    callbacks: Vec<Arc<dyn EpochCallback>>,
}

impl DistributedTrainer {
    /// Create a trainer from a configuration.
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
        }
    }

    /// Register an epoch-end callback (invoked by rank 0 only).
    pub fn with_callback(mut self, callback: Arc<dyn EpochCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// The configuration this trainer was built with.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` on `train`, updating its parameters in place and
    /// attaching the per-epoch loss history.
    ///
    /// Blocks until every worker has finished or any worker has failed.
    pub fn fit(&self, model: &mut EmbeddingModel, train: &TripleStore) -> Result<()> {
        let cfg = self.config.sanitized(model.scoring(), train.len())?;

        if train.max_entity_bound() as usize > model.num_entities()
            || train.max_relation_bound() as usize > model.num_relations()
        {
            return Err(Error::Config(
                "training triples reference ids outside the model's vocabularies".into(),
            ));
        }

        let world = cfg.num_workers();
        let group = AllReduceGroup::new(world, cfg.sync_timeout)?;
        let checkpoint = NamedTempFile::new()?;
        let checkpoint_path: PathBuf = checkpoint.path().to_path_buf();
        let train_triples: Vec<Triple> = train.to_vec();
        // Train-split targets only; the evaluation-time union never reaches
        // a gradient computation.
        let kvs_targets = (cfg.technique == ScoringTechnique::KvsAll)
            .then(|| CompletionIndex::from_stores(&[train]));
        let (loss_tx, loss_rx) = unbounded::<f32>();

        tracing::info!(
            world_size = world,
            epochs = cfg.epochs,
            batch_size = cfg.batch_size,
            triples = train_triples.len(),
            "launching training workers"
        );

        let outcomes: Vec<Result<()>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(world);
            for rank in 0..world {
                let replica = model.clone();
                let group = group.clone();
                let loss_tx = loss_tx.clone();
                let callbacks = self.callbacks.clone();
                let cfg = &cfg;
                let train = train_triples.as_slice();
                let targets = kvs_targets.as_ref();
                let checkpoint_path = checkpoint_path.clone();
                handles.push(scope.spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        run_worker(
                            rank,
                            world,
                            replica,
                            train,
                            cfg,
                            targets,
                            &group,
                            &loss_tx,
                            &callbacks,
                            &checkpoint_path,
                        )
                    }));
                    let outcome = match outcome {
                        Ok(result) => result,
                        Err(_) => Err(Error::Coordination(format!("worker {rank} panicked"))),
                    };
                    if let Err(e) = &outcome {
                        // Release any peers blocked in a collective call.
                        group.poison(&format!("worker {rank} failed: {e}"));
                    }
                    outcome
                }));
            }
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::Coordination("worker thread could not be joined".into()))
                    })
                })
                .collect()
        });
        drop(loss_tx);

        for outcome in outcomes {
            outcome?;
        }

        model.load_state_file(&checkpoint_path)?;
        model.loss_history = loss_rx.try_iter().collect();
        checkpoint.close()?;

        tracing::info!(
            final_loss = model.loss_history.last().copied().unwrap_or(f32::NAN),
            "training complete"
        );
        Ok(())
    }
}

/// One worker's whole lifetime inside a launch.
#[allow(clippy::too_many_arguments)]
fn run_worker(
    rank: usize,
    world: usize,
    replica: EmbeddingModel,
    train: &[Triple],
    cfg: &TrainingConfig,
    targets: Option<&CompletionIndex>,
    group: &AllReduceGroup,
    loss_tx: &Sender<f32>,
    callbacks: &[Arc<dyn EpochCallback>],
    checkpoint: &Path,
) -> Result<()> {
    // Rendezvous: nobody proceeds until the whole group is present.
    group.join()?;

    let mut sampler = DistributedSampler::new(train.len(), world, rank, cfg.seed)?;
    let mut optimizer = cfg.optimizer.build(cfg.learning_rate);
    let mut replica = DataParallel::new(replica, group.clone());
    let mut grads = GradientBuffer::for_model(replica.module());

    // Shards may differ in size by one, so every worker drives the same
    // number of collective rounds; short shards contribute zero gradients
    // and still apply the averaged update, keeping replicas identical.
    let max_shard = train.len().div_ceil(world);
    let rounds_per_epoch = max_shard.div_ceil(cfg.batch_size);

    for epoch in 0..cfg.epochs {
        sampler.set_epoch(epoch);
        let batches = sampler.batches(cfg.batch_size);
        let mut rng = XorShiftRng::seed_from_u64(corruption_seed(cfg.seed, epoch, rank));
        let mut epoch_loss = 0.0f32;
        let mut num_batches = 0usize;

        for round in 0..rounds_per_epoch {
            grads.zero();
            let batch_loss = match batches.get(round) {
                Some(indices) => {
                    let batch: Vec<Triple> = indices.iter().map(|&i| train[i]).collect();
                    Some(replica.module().backward(
                        &batch,
                        cfg.technique,
                        cfg.margin,
                        cfg.neg_ratio,
                        targets,
                        &mut rng,
                        &mut grads,
                    )?)
                }
                None => None,
            };

            replica.sync_gradients(&mut grads)?;
            let module = replica.module_mut();
            optimizer.step("entity", module.entity_params_mut(), grads.entity());
            optimizer.step("relation", module.relation_params_mut(), grads.relation());

            if let Some(loss) = batch_loss {
                epoch_loss += loss;
                num_batches += 1;
                if rank == 0 {
                    tracing::debug!(epoch, batch = num_batches, loss, "batch complete");
                }
            }
        }

        // Local mean, not averaged across the group: progress reporting only.
        let mean_loss = if num_batches > 0 {
            epoch_loss / num_batches as f32
        } else {
            0.0
        };
        if rank == 0 {
            tracing::info!(epoch, loss = mean_loss, "epoch complete");
            let _ = loss_tx.send(mean_loss);
            for callback in callbacks {
                callback.on_epoch_end(replica.module(), epoch, mean_loss);
            }
        }
    }

    if rank == 0 {
        replica.module().save_state_file(checkpoint)?;
    }
    // Leave together so the checkpoint is complete before anyone returns.
    group.join()?;
    Ok(())
}

fn corruption_seed(seed: u64, epoch: usize, rank: usize) -> u64 {
    seed ^ ((epoch as u64) << 20) ^ (((rank as u64) << 1) | 1)
}
