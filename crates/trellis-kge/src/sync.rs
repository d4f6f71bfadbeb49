//! Gradient synchronization across a fixed-size worker group.
//!
//! [`AllReduceGroup`] is the collective-communication primitive the training
//! loop leans on: every worker contributes a buffer of equal length, the
//! call blocks until all `world_size` members have contributed, and every
//! member leaves observing the exact same element-wise mean. Because the
//! call cannot complete until the whole group arrives, it doubles as the
//! per-batch barrier that keeps model replicas in lockstep — and, with an
//! empty buffer, as a plain rendezvous barrier.
//!
//! The implementation is a monitor: one mutex-guarded round state plus a
//! condvar, with a generation counter so the group can be reused round after
//! round. Two failure paths are handled explicitly:
//!
//! - every wait is bounded by the configured timeout, so an absent peer
//!   turns into an error rather than a hang;
//! - a failing worker poisons the group, releasing every blocked peer with
//!   an error immediately.
//!
//! There is no recovery from either: the launch is torn down (see the
//! trainer's failure semantics).

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{EmbeddingModel, GradientBuffer};

#[derive(Default)]
struct RoundState {
    arrived: usize,
    generation: u64,
    accum: Vec<f32>,
    result: Vec<f32>,
    poisoned: Option<String>,
}

struct Shared {
    state: Mutex<RoundState>,
    cond: Condvar,
}

/// Mean all-reduce over a fixed group of workers.
///
/// Cloning yields another handle to the same group; hand one clone to each
/// worker.
#[derive(Clone)]
pub struct AllReduceGroup {
    shared: Arc<Shared>,
    world_size: usize,
    timeout: Duration,
}

impl AllReduceGroup {
    /// Create a group expecting exactly `world_size` members, with every
    /// collective wait bounded by `timeout`.
    pub fn new(world_size: usize, timeout: Duration) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::Config("worker group needs at least one member".into()));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RoundState::default()),
                cond: Condvar::new(),
            }),
            world_size,
            timeout,
        })
    }

    /// Number of members this group expects.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Rendezvous: block until every member has called `join`.
    pub fn join(&self) -> Result<()> {
        self.all_reduce_mean(&mut [])
    }

    /// Average `values` element-wise across all members, in place.
    ///
    /// Blocks until every member of the group has contributed a buffer of
    /// the same length. All members observe the identical averaged result.
    pub fn all_reduce_mean(&self, values: &mut [f32]) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }

        let mut st = self.lock()?;
        if let Some(reason) = &st.poisoned {
            return Err(Error::Coordination(reason.clone()));
        }

        if st.arrived == 0 {
            st.accum.clear();
            st.accum.resize(values.len(), 0.0);
        } else if st.accum.len() != values.len() {
            let msg = format!(
                "collective buffer length mismatch: group holds {}, member sent {}",
                st.accum.len(),
                values.len()
            );
            st.poisoned = Some(msg.clone());
            self.shared.cond.notify_all();
            return Err(Error::Coordination(msg));
        }

        for (acc, v) in st.accum.iter_mut().zip(values.iter()) {
            *acc += *v;
        }
        st.arrived += 1;
        let my_generation = st.generation;

        if st.arrived == self.world_size {
            let scale = 1.0 / self.world_size as f32;
            for acc in st.accum.iter_mut() {
                *acc *= scale;
            }
            // Swap keeps the old result's capacity around for the next round.
            let st = &mut *st;
            std::mem::swap(&mut st.result, &mut st.accum);
            st.accum.clear();
            st.arrived = 0;
            st.generation = st.generation.wrapping_add(1);
            values.copy_from_slice(&st.result);
            self.shared.cond.notify_all();
            return Ok(());
        }

        loop {
            let (guard, wait) = self
                .shared
                .cond
                .wait_timeout(st, self.timeout)
                .map_err(|_| Error::Coordination("worker group lock poisoned".into()))?;
            st = guard;
            if let Some(reason) = &st.poisoned {
                return Err(Error::Coordination(reason.clone()));
            }
            if st.generation != my_generation {
                break;
            }
            if wait.timed_out() {
                let msg = format!(
                    "collective call timed out after {:?} waiting for {} of {} members",
                    self.timeout,
                    self.world_size - st.arrived,
                    self.world_size
                );
                st.poisoned = Some(msg.clone());
                self.shared.cond.notify_all();
                return Err(Error::Coordination(msg));
            }
        }

        values.copy_from_slice(&st.result);
        Ok(())
    }

    /// Mark the group failed, releasing every blocked member with an error.
    pub fn poison(&self, reason: &str) {
        if let Ok(mut st) = self.shared.state.lock() {
            if st.poisoned.is_none() {
                st.poisoned = Some(reason.to_string());
            }
            self.shared.cond.notify_all();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RoundState>> {
        self.shared
            .state
            .lock()
            .map_err(|_| Error::Coordination("worker group lock poisoned".into()))
    }
}

/// A model replica wired to its worker group.
///
/// The wrapper owns one worker's replica and averages its gradient buffer
/// across the group after each backward pass; the optimizer step that
/// follows then applies the same update on every worker, keeping the
/// replicas bit-identical without ever exchanging parameters.
pub struct DataParallel {
    model: EmbeddingModel,
    group: AllReduceGroup,
}

impl DataParallel {
    /// Wrap a replica for participation in `group`.
    pub fn new(model: EmbeddingModel, group: AllReduceGroup) -> Self {
        Self { model, group }
    }

    /// The wrapped (unwrapped-view) model.
    pub fn module(&self) -> &EmbeddingModel {
        &self.model
    }

    /// Mutable access to the wrapped model.
    pub fn module_mut(&mut self) -> &mut EmbeddingModel {
        &mut self.model
    }

    /// The group this replica synchronizes with.
    pub fn group(&self) -> &AllReduceGroup {
        &self.group
    }

    /// Unwrap, keeping the trained parameters.
    pub fn into_module(self) -> EmbeddingModel {
        self.model
    }

    /// Average `grads` across the worker group (blocks for the whole group).
    pub fn sync_gradients(&self, grads: &mut GradientBuffer) -> Result<()> {
        self.group.all_reduce_mean(grads.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_single_member_is_noop() {
        let group = AllReduceGroup::new(1, TIMEOUT).unwrap();
        let mut values = [1.0, 2.0];
        group.all_reduce_mean(&mut values).unwrap();
        assert_eq!(values, [1.0, 2.0]);
        group.join().unwrap();
    }

    #[test]
    fn test_zero_members_rejected() {
        assert!(AllReduceGroup::new(0, TIMEOUT).is_err());
    }

    #[test]
    fn test_two_members_exact_average() {
        let group = AllReduceGroup::new(2, TIMEOUT).unwrap();
        let g2 = group.clone();

        let handle = thread::spawn(move || {
            let mut values = [1.0f32, 2.0, 3.0];
            g2.all_reduce_mean(&mut values).unwrap();
            values
        });

        let mut values = [3.0f32, 4.0, 5.0];
        group.all_reduce_mean(&mut values).unwrap();
        let other = handle.join().unwrap();

        // (g1 + g2) / 2, bit-exact on both members.
        assert_eq!(values, [2.0, 3.0, 4.0]);
        assert_eq!(other, values);
    }

    #[test]
    fn test_group_is_reusable_across_rounds() {
        let group = AllReduceGroup::new(3, TIMEOUT).unwrap();
        let mut handles = Vec::new();
        for rank in 0..3 {
            let g = group.clone();
            handles.push(thread::spawn(move || {
                let mut out = Vec::new();
                for round in 0..4 {
                    let mut values = [(rank + round) as f32];
                    g.all_reduce_mean(&mut values).unwrap();
                    out.push(values[0]);
                }
                out
            }));
        }
        let results: Vec<Vec<f32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Round r: mean of r, r+1, r+2.
        for (rank_result, _) in results.iter().zip(0..) {
            assert_eq!(rank_result, &vec![1.0, 2.0, 3.0, 4.0]);
        }
    }

    #[test]
    fn test_timeout_poisons_group() {
        let group = AllReduceGroup::new(2, Duration::from_millis(50)).unwrap();
        let mut values = [1.0f32];
        let err = group.all_reduce_mean(&mut values).unwrap_err();
        assert!(matches!(err, Error::Coordination(_)));

        // Late arrivals observe the poisoned group.
        let err = group.all_reduce_mean(&mut values).unwrap_err();
        assert!(matches!(err, Error::Coordination(_)));
    }

    #[test]
    fn test_poison_releases_blocked_member() {
        let group = AllReduceGroup::new(2, TIMEOUT).unwrap();
        let g2 = group.clone();

        let handle = thread::spawn(move || {
            let mut values = [1.0f32];
            g2.all_reduce_mean(&mut values)
        });

        // Give the member time to block, then fail the group.
        thread::sleep(Duration::from_millis(50));
        group.poison("simulated worker failure");

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Coordination(_)));
    }

    #[test]
    fn test_length_mismatch_poisons() {
        let group = AllReduceGroup::new(2, TIMEOUT).unwrap();
        let g2 = group.clone();

        let handle = thread::spawn(move || {
            let mut values = [1.0f32, 2.0];
            g2.all_reduce_mean(&mut values)
        });

        thread::sleep(Duration::from_millis(50));
        let mut values = [1.0f32];
        let err = group.all_reduce_mean(&mut values).unwrap_err();
        assert!(matches!(err, Error::Coordination(_)));
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn test_join_rendezvous() {
        let group = AllReduceGroup::new(2, TIMEOUT).unwrap();
        let g2 = group.clone();
        let handle = thread::spawn(move || g2.join());
        group.join().unwrap();
        handle.join().unwrap().unwrap();
    }
}
