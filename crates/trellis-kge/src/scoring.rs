//! Scoring functions for knowledge-graph embeddings.
//!
//! Each function encodes a geometric hypothesis about how a relation
//! transforms its subject into its object:
//!
//! | Function | Hypothesis | Score |
//! |----------|------------|-------|
//! | TransE | relations translate | -‖h + r - t‖₂ |
//! | DistMult | relations scale | Σᵢ hᵢrᵢtᵢ |
//! | RotatE | relations rotate (ℂ) | -‖h ∘ r - t‖ |
//! | ComplEx | asymmetric bilinear (ℂ) | Re(⟨h, r, conj(t)⟩) |
//!
//! Higher scores always mean "more plausible"; distance-based functions
//! negate the distance so the convention holds everywhere.
//!
//! All four functions score triples and full candidate sweeps. Only TransE
//! and DistMult carry analytic gradients here, so only those two are
//! trainable; the complex-valued pair is available for scoring models whose
//! parameters were produced elsewhere.

use serde::{Deserialize, Serialize};

/// Scoring function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringFunction {
    /// TransE: -‖h + r - t‖₂
    TransE,
    /// DistMult: ⟨h, r, t⟩
    DistMult,
    /// RotatE: -‖h ∘ r - t‖ in complex space (even dimension).
    RotatE,
    /// ComplEx: Re(⟨h, r, conj(t)⟩) (even dimension).
    ComplEx,
}

impl ScoringFunction {
    /// Score a triple from its embedding vectors.
    ///
    /// For the complex-valued functions the vectors are interpreted as
    /// interleaved (re, im) pairs, so the stored dimension must be even.
    pub fn score(self, head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
        match self {
            Self::TransE => score_transe(head, relation, tail),
            Self::DistMult => score_distmult(head, relation, tail),
            Self::RotatE => score_rotate(head, relation, tail),
            Self::ComplEx => score_complex(head, relation, tail),
        }
    }

    /// Whether analytic gradients are implemented for this function.
    pub fn is_trainable(self) -> bool {
        matches!(self, Self::TransE | Self::DistMult)
    }

    /// Whether the function can be trained one-vs-all (scored against every
    /// entity with multi-hot targets). Distance-based functions cannot.
    pub fn supports_one_vs_all(self) -> bool {
        matches!(self, Self::DistMult)
    }

    /// Whether embeddings must have an even dimension (complex pairs).
    pub fn requires_even_dim(self) -> bool {
        matches!(self, Self::RotatE | Self::ComplEx)
    }
}

impl std::fmt::Display for ScoringFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransE => "TransE",
            Self::DistMult => "DistMult",
            Self::RotatE => "RotatE",
            Self::ComplEx => "ComplEx",
        };
        f.write_str(name)
    }
}

/// TransE: -‖h + r - t‖₂
fn score_transe(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let mut sum_sq = 0.0;
    for i in 0..head.len() {
        let diff = head[i] + relation[i] - tail[i];
        sum_sq += diff * diff;
    }
    -sum_sq.sqrt()
}

/// DistMult: ⟨h, r, t⟩
fn score_distmult(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let mut score = 0.0;
    for i in 0..head.len() {
        score += head[i] * relation[i] * tail[i];
    }
    score
}

/// RotatE: -‖h ∘ r - t‖ with (re, im) interleaved.
fn score_rotate(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let dim = head.len() / 2;
    let mut sum_sq = 0.0;

    for i in 0..dim {
        let (h_re, h_im) = (head[2 * i], head[2 * i + 1]);
        let (r_re, r_im) = (relation[2 * i], relation[2 * i + 1]);
        let (t_re, t_im) = (tail[2 * i], tail[2 * i + 1]);

        // (a+bi)(c+di) = (ac-bd) + (ad+bc)i
        let rot_re = h_re * r_re - h_im * r_im;
        let rot_im = h_re * r_im + h_im * r_re;

        let diff_re = rot_re - t_re;
        let diff_im = rot_im - t_im;
        sum_sq += diff_re * diff_re + diff_im * diff_im;
    }
    -sum_sq.sqrt()
}

/// ComplEx: Re(⟨h, r, conj(t)⟩) with (re, im) interleaved.
fn score_complex(head: &[f32], relation: &[f32], tail: &[f32]) -> f32 {
    let dim = head.len() / 2;
    let mut score = 0.0;

    for i in 0..dim {
        let (h_re, h_im) = (head[2 * i], head[2 * i + 1]);
        let (r_re, r_im) = (relation[2 * i], relation[2 * i + 1]);
        let (t_re, t_im) = (tail[2 * i], tail[2 * i + 1]);

        // Re((h*r) * conj(t)) where h*r = x + yi
        let x = h_re * r_re - h_im * r_im;
        let y = h_re * r_im + h_im * r_re;
        score += x * t_re + y * t_im;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transe_exact_translation() {
        // h + r = t scores 0, the maximum.
        let h = vec![0.5, -0.5, 1.0];
        let r = vec![0.5, 0.5, -1.0];
        let t = vec![1.0, 0.0, 0.0];
        let score = ScoringFunction::TransE.score(&h, &r, &t);
        assert!(score.abs() < 1e-6);

        let t_far = vec![1.0, 0.0, 2.0];
        assert!(ScoringFunction::TransE.score(&h, &r, &t_far) < score);
    }

    #[test]
    fn test_distmult_trilinear() {
        let h = vec![2.0, 0.0, 1.0];
        let r = vec![1.0, 3.0, 1.0];
        let t = vec![1.0, 1.0, 0.5];
        // 2*1*1 + 0*3*1 + 1*1*0.5 = 2.5
        let score = ScoringFunction::DistMult.score(&h, &r, &t);
        assert!((score - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_distmult_is_symmetric() {
        let h = vec![0.3, -0.7];
        let r = vec![1.1, 0.2];
        let t = vec![-0.4, 0.9];
        let forward = ScoringFunction::DistMult.score(&h, &r, &t);
        let backward = ScoringFunction::DistMult.score(&t, &r, &h);
        assert!((forward - backward).abs() < 1e-6);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        // h = 1, r = i (90° rotation), so h∘r = i = t exactly.
        let h = vec![1.0, 0.0];
        let r = vec![0.0, 1.0];
        let t = vec![0.0, 1.0];
        let score = ScoringFunction::RotatE.score(&h, &r, &t);
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn test_complex_real_line() {
        let h = vec![2.0, 0.0];
        let r = vec![1.0, 0.0];
        let t = vec![3.0, 0.0];
        // Re(2 * 1 * conj(3)) = 6
        let score = ScoringFunction::ComplEx.score(&h, &r, &t);
        assert!((score - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_trainability_flags() {
        assert!(ScoringFunction::TransE.is_trainable());
        assert!(ScoringFunction::DistMult.is_trainable());
        assert!(!ScoringFunction::RotatE.is_trainable());
        assert!(!ScoringFunction::ComplEx.is_trainable());

        assert!(ScoringFunction::DistMult.supports_one_vs_all());
        assert!(!ScoringFunction::TransE.supports_one_vs_all());

        assert!(ScoringFunction::RotatE.requires_even_dim());
        assert!(!ScoringFunction::DistMult.requires_even_dim());
    }
}
