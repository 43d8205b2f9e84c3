//! Relaxed categorical sampling (Gumbel-softmax).
//!
//! ```text
//! g ~ Gumbel(0, 1)
//! y = softmax((logits + g) / T)
//! ```
//!
//! Low `T` pushes `y` toward a one-hot vector, high `T` toward uniform. The
//! deterministic branch is a plain softmax over the logits.

use ndarray::{Array2, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, Gumbel};

/// How a row of logits was turned into a distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Relaxation {
    /// `softmax((logits + g) / temperature)`
    Gumbel { temperature: f32 },
    /// `softmax(logits)`
    Softmax,
}

impl Relaxation {
    /// Factor applied to the logits before the softmax.
    pub fn inverse_temperature(&self) -> f32 {
        match self {
            Relaxation::Gumbel { temperature } => 1.0 / temperature,
            Relaxation::Softmax => 1.0,
        }
    }
}

/// Row-wise softmax with max subtraction.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Draw a relaxed categorical sample for every row of `logits`.
pub fn relaxed_categorical_sample<R: Rng + ?Sized>(
    logits: &Array2<f32>,
    temperature: f32,
    rng: &mut R,
) -> Array2<f32> {
    let perturbed = match Gumbel::new(0.0_f32, 1.0) {
        Ok(gumbel) => logits.mapv(|l| (l + gumbel.sample(rng)) / temperature),
        Err(_) => logits / temperature,
    };
    softmax_rows(&perturbed)
}

/// Apply `relaxation` to `logits`, drawing noise only for the Gumbel branch.
pub fn relax<R: Rng + ?Sized>(logits: &Array2<f32>, relaxation: Relaxation, rng: &mut R) -> Array2<f32> {
    match relaxation {
        Relaxation::Gumbel { temperature } => relaxed_categorical_sample(logits, temperature, rng),
        Relaxation::Softmax => softmax_rows(logits),
    }
}

/// Vector-Jacobian product of `p = softmax(scale · x)`.
///
/// Given `dp = ∂L/∂p` returns `∂L/∂x = scale · p ⊙ (dp − Σ p ⊙ dp)`. The
/// Gumbel noise is additive, so the same product covers both branches.
pub fn softmax_backward(probs: &Array2<f32>, d_probs: &Array2<f32>, scale: f32) -> Array2<f32> {
    let dot = (probs * d_probs).sum_axis(Axis(1)).insert_axis(Axis(1));
    let mut out = Array2::zeros(probs.raw_dim());
    Zip::from(&mut out)
        .and(probs)
        .and(d_probs)
        .and_broadcast(&dot)
        .for_each(|o, &p, &dp, &s| *o = scale * p * (dp - s));
    out
}
