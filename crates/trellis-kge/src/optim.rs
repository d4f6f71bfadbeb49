//! First-order optimizers over flat parameter slices.
//!
//! State is keyed by parameter-group name (the model has two groups,
//! `"entity"` and `"relation"`), so one optimizer instance serves a whole
//! replica. Reference: Kingma & Ba (2014), "Adam: A Method for Stochastic
//! Optimization".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Optimizer selector, stored in the training configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Stochastic gradient descent with optional momentum.
    Sgd {
        /// Velocity decay rate; 0.0 disables momentum.
        momentum: f32,
    },
    /// Adam with default betas (0.9, 0.999).
    Adam,
}

impl OptimizerKind {
    /// Instantiate the optimizer with the given learning rate.
    pub fn build(self, learning_rate: f32) -> Optimizer {
        match self {
            Self::Sgd { momentum } => Optimizer::Sgd(Sgd::new(learning_rate, momentum)),
            Self::Adam => Optimizer::Adam(Adam::new(learning_rate)),
        }
    }
}

/// A built optimizer holding per-group state.
pub enum Optimizer {
    Sgd(Sgd),
    Adam(Adam),
}

impl Optimizer {
    /// Apply one update step to the named parameter group.
    pub fn step(&mut self, group: &str, params: &mut [f32], grads: &[f32]) {
        match self {
            Self::Sgd(opt) => opt.step(group, params, grads),
            Self::Adam(opt) => opt.step(group, params, grads),
        }
    }
}

/// SGD with optional momentum: v = γv + η∇, θ = θ - v.
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: HashMap<String, Vec<f32>>,
}

impl Sgd {
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: HashMap::new(),
        }
    }

    pub fn step(&mut self, group: &str, params: &mut [f32], grads: &[f32]) {
        if self.momentum == 0.0 {
            for (p, g) in params.iter_mut().zip(grads) {
                *p -= self.learning_rate * g;
            }
            return;
        }

        let velocity = self
            .velocity
            .entry(group.to_string())
            .or_insert_with(|| vec![0.0; params.len()]);
        for i in 0..params.len() {
            velocity[i] = self.momentum * velocity[i] + self.learning_rate * grads[i];
            params[i] -= velocity[i];
        }
    }
}

/// Adam: bias-corrected first/second moment estimates, per-parameter rates.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// Per-group (step count, first moment, second moment).
    state: HashMap<String, (u64, Vec<f32>, Vec<f32>)>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            state: HashMap::new(),
        }
    }

    pub fn step(&mut self, group: &str, params: &mut [f32], grads: &[f32]) {
        let (t, m, v) = self
            .state
            .entry(group.to_string())
            .or_insert_with(|| (0, vec![0.0; params.len()], vec![0.0; params.len()]));
        *t += 1;
        let bias1 = 1.0 - self.beta1.powi(*t as i32);
        let bias2 = 1.0 - self.beta2.powi(*t as i32);

        for i in 0..params.len() {
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * grads[i];
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = m[i] / bias1;
            let v_hat = v[i] / bias2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_plain_step() {
        let mut opt = Sgd::new(0.1, 0.0);
        let mut params = vec![1.0, 2.0];
        opt.step("entity", &mut params, &[1.0, -1.0]);
        assert!((params[0] - 0.9).abs() < 1e-6);
        assert!((params[1] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut opt = Sgd::new(0.1, 0.9);
        let mut params = vec![0.0];
        opt.step("entity", &mut params, &[1.0]);
        let after_one = params[0];
        opt.step("entity", &mut params, &[1.0]);
        // Second step moves farther than the first: velocity built up.
        assert!((after_one - params[0]).abs() > after_one.abs());
    }

    #[test]
    fn test_adam_descends_quadratic() {
        // Minimize f(x) = x^2 from x = 2; gradient is 2x.
        let mut opt = Adam::new(0.1);
        let mut params = vec![2.0];
        for _ in 0..200 {
            let grad = 2.0 * params[0];
            opt.step("entity", &mut params, &[grad]);
        }
        assert!(params[0].abs() < 0.1, "got {}", params[0]);
    }

    #[test]
    fn test_state_isolated_per_group() {
        let mut opt = Adam::new(0.1);
        let mut a = vec![1.0];
        let mut b = vec![1.0];
        opt.step("entity", &mut a, &[1.0]);
        opt.step("entity", &mut a, &[1.0]);
        // A fresh group starts with zeroed moments, same as a's first step.
        opt.step("relation", &mut b, &[1.0]);
        assert!((1.0 - b[0]) > 0.0);
        assert!(a[0] < b[0]);
    }
}
