//! Epoch-deterministic data partitioning across workers.
//!
//! Every worker derives the *same* global permutation from `(seed, epoch)`
//! and then keeps only the positions congruent to its rank, so the shards
//! are disjoint and jointly cover the training set exactly once — no
//! communication needed to agree on the shuffle.
//!
//! Unlike samplers that pad the tail so all shards are equal-sized, nothing
//! is duplicated here: when `len % world_size != 0` the first shards are one
//! element longer.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use crate::error::{Error, Result};

/// Rank-strided sampler over a fixed-size dataset.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_len: usize,
    world_size: usize,
    rank: usize,
    seed: u64,
    epoch: usize,
}

impl DistributedSampler {
    /// Create a sampler for one worker of a group.
    pub fn new(dataset_len: usize, world_size: usize, rank: usize, seed: u64) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::Config("world size must be at least 1".into()));
        }
        if rank >= world_size {
            return Err(Error::Config(format!(
                "rank {rank} is outside world of size {world_size}"
            )));
        }
        Ok(Self {
            dataset_len,
            world_size,
            rank,
            seed,
            epoch: 0,
        })
    }

    /// Select the epoch; reshuffles the global permutation identically on
    /// every worker that sets the same epoch.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    /// This worker's shard of dataset indices for the current epoch.
    pub fn shard(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset_len).collect();
        let mut rng = XorShiftRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
        order.shuffle(&mut rng);
        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }

    /// The shard split into mini-batches of at most `batch_size` indices.
    pub fn batches(&self, batch_size: usize) -> Vec<Vec<usize>> {
        let batch_size = batch_size.max(1);
        self.shard()
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Number of indices in this worker's shard.
    pub fn shard_len(&self) -> usize {
        let base = self.dataset_len / self.world_size;
        let extra = usize::from(self.rank < self.dataset_len % self.world_size);
        base + extra
    }
}
