//! Evidence lower bound.
//!
//! ```text
//! recon = Σ_elements ℓ(x, x̂) / batch              (per-example sum)
//! kl    = Σ_batch Σ_steps KL(Cat(softmax(y_t)) ‖ Uniform(V))
//! total = recon + β · kl
//! ```
//!
//! Each relaxed row `y_t` parameterises the model's categorical through a
//! softmax, so `KL = Σ_k q_k log q_k + log V` with `q = softmax(y_t)`. The KL
//! is summed, not averaged, over steps and batch.

use ndarray::{Array2, Array3, Axis, Zip};

use crate::config::ReconLoss;
use crate::core::gru::sigmoid;

/// Scalar loss and its two components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElboTerms {
    pub total: f32,
    pub reconstruction: f32,
    pub kl: f32,
}

/// Gradients of the ELBO with respect to its differentiable inputs.
#[derive(Clone, Debug)]
pub struct ElboGrad {
    /// ∂L/∂x̂: [batch, input_size]
    pub d_reconstruction: Array2<f32>,

    /// ∂L/∂y: [batch, L, V]
    pub d_relaxed: Array3<f32>,
}

/// Summed reconstruction error divided by batch size.
pub fn reconstruction_loss(inputs: &Array2<f32>, reconstruction: &Array2<f32>, kind: ReconLoss) -> f32 {
    let batch = inputs.nrows().max(1) as f32;
    let total = match kind {
        ReconLoss::SumSquares => Zip::from(inputs)
            .and(reconstruction)
            .fold(0.0_f32, |acc, &x, &r| acc + (r - x) * (r - x)),
        // Stable BCE on logits: max(r, 0) − r·x + log(1 + e^{−|r|})
        ReconLoss::CrossEntropy => Zip::from(inputs).and(reconstruction).fold(0.0_f32, |acc, &x, &r| {
            acc + r.max(0.0) - r * x + (-r.abs()).exp().ln_1p()
        }),
    };
    total / batch
}

/// ∂ reconstruction_loss / ∂x̂.
pub fn reconstruction_loss_grad(
    inputs: &Array2<f32>,
    reconstruction: &Array2<f32>,
    kind: ReconLoss,
) -> Array2<f32> {
    let batch = inputs.nrows().max(1) as f32;
    let mut grad = Array2::zeros(reconstruction.raw_dim());
    Zip::from(&mut grad)
        .and(inputs)
        .and(reconstruction)
        .for_each(|g, &x, &r| {
            *g = match kind {
                ReconLoss::SumSquares => 2.0 * (r - x) / batch,
                ReconLoss::CrossEntropy => (sigmoid(r) - x) / batch,
            }
        });
    grad
}

/// Row-wise log-softmax over the last axis.
fn log_softmax_last(y: &Array3<f32>) -> Array3<f32> {
    let mut out = y.clone();
    for mut row in out.lanes_mut(Axis(2)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.fold(0.0_f32, |s, &v| s + (v - max).exp()).ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    }
    out
}

/// KL divergence against the uniform prior, summed over steps and batch.
pub fn kl_uniform(relaxed: &Array3<f32>) -> f32 {
    let vocab = relaxed.len_of(Axis(2)) as f32;
    let log_q = log_softmax_last(relaxed);
    let rows = (relaxed.len_of(Axis(0)) * relaxed.len_of(Axis(1))) as f32;
    let neg_entropy: f32 = log_q.iter().map(|&lq| lq.exp() * lq).sum();
    neg_entropy + rows * vocab.ln()
}

/// ∂ kl_uniform / ∂y: `q ⊙ (log q − Σ q log q)` per row.
pub fn kl_uniform_grad(relaxed: &Array3<f32>) -> Array3<f32> {
    let mut grad = log_softmax_last(relaxed);
    for mut row in grad.lanes_mut(Axis(2)) {
        let neg_entropy: f32 = row.iter().map(|&lq| lq.exp() * lq).sum();
        row.mapv_inplace(|lq| lq.exp() * (lq - neg_entropy));
    }
    grad
}

/// Evaluate the ELBO. Shapes are assumed valid.
pub fn elbo(
    inputs: &Array2<f32>,
    reconstruction: &Array2<f32>,
    relaxed: &Array3<f32>,
    beta: f32,
    kind: ReconLoss,
) -> ElboTerms {
    let recon = reconstruction_loss(inputs, reconstruction, kind);
    let kl = kl_uniform(relaxed);
    ElboTerms {
        total: recon + beta * kl,
        reconstruction: recon,
        kl,
    }
}

/// Gradient of [`elbo`]'s total.
pub fn elbo_grad(
    inputs: &Array2<f32>,
    reconstruction: &Array2<f32>,
    relaxed: &Array3<f32>,
    beta: f32,
    kind: ReconLoss,
) -> ElboGrad {
    ElboGrad {
        d_reconstruction: reconstruction_loss_grad(inputs, reconstruction, kind),
        d_relaxed: kl_uniform_grad(relaxed) * beta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sum_squares_is_per_example_sum() {
        let x = array![[1.0, 2.0], [0.0, 0.0]];
        let r = array![[1.5, 2.0], [1.0, -1.0]];
        // (0.25 + 0 + 1 + 1) / 2
        let l = reconstruction_loss(&x, &r, ReconLoss::SumSquares);
        assert!((l - 1.125).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_matches_naive() {
        let x = array![[1.0, 0.0, 0.3]];
        let r = array![[0.2, -1.5, 3.0]];
        let naive: f32 = x
            .iter()
            .zip(r.iter())
            .map(|(&t, &z): (&f32, &f32)| {
                let p = 1.0 / (1.0 + (-z).exp());
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum();
        let l = reconstruction_loss(&x, &r, ReconLoss::CrossEntropy);
        assert!((l - naive).abs() < 1e-5, "{} vs {}", l, naive);
    }

    #[test]
    fn test_reconstruction_grad_matches_finite_difference() {
        let x = array![[0.2, 0.9], [0.5, 0.1]];
        let r = array![[0.4, -0.3], [1.2, 0.0]];
        for &kind in &[ReconLoss::SumSquares, ReconLoss::CrossEntropy] {
            let g = reconstruction_loss_grad(&x, &r, kind);
            let eps = 1e-2;
            for idx in [(0usize, 0usize), (1, 1)] {
                let mut rp = r.clone();
                rp[idx] += eps;
                let mut rm = r.clone();
                rm[idx] -= eps;
                let numeric = (reconstruction_loss(&x, &rp, kind) - reconstruction_loss(&x, &rm, kind)) / (2.0 * eps);
                assert!((g[idx] - numeric).abs() < 1e-3, "{:?}: {} vs {}", kind, g[idx], numeric);
            }
        }
    }

    #[test]
    fn test_kl_zero_for_uniform() {
        let relaxed = Array3::from_elem((3, 2, 4), 0.25);
        assert!(kl_uniform(&relaxed).abs() < 1e-5);
        assert!(kl_uniform_grad(&relaxed).iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_kl_sums_over_steps_and_batch() {
        let one = Array3::from_shape_vec((1, 1, 3), vec![0.9, 0.05, 0.05]).unwrap();
        let many = Array3::from_shape_fn((2, 3, 3), |(_, _, k)| if k == 0 { 0.9 } else { 0.05 });
        let single = kl_uniform(&one);
        assert!(single > 0.0);
        assert!((kl_uniform(&many) - 6.0 * single).abs() < 1e-4);
    }

    #[test]
    fn test_kl_grad_matches_finite_difference() {
        let y = Array3::from_shape_vec((1, 1, 3), vec![0.7, 0.2, 0.1]).unwrap();
        let g = kl_uniform_grad(&y);
        let eps = 1e-2;
        for k in 0..3 {
            let mut yp = y.clone();
            yp[[0, 0, k]] += eps;
            let mut ym = y.clone();
            ym[[0, 0, k]] -= eps;
            let numeric = (kl_uniform(&yp) - kl_uniform(&ym)) / (2.0 * eps);
            assert!((g[[0, 0, k]] - numeric).abs() < 1e-3, "{} vs {}", g[[0, 0, k]], numeric);
        }
    }

    #[test]
    fn test_beta_zero_ignores_kl() {
        let x = array![[1.0, 0.0]];
        let r = array![[0.5, 0.5]];
        let skewed = Array3::from_shape_fn((1, 2, 3), |(_, _, k)| if k == 2 { 1.0 } else { 0.0 });
        let terms = elbo(&x, &r, &skewed, 0.0, ReconLoss::SumSquares);
        assert!(terms.kl > 0.0);
        assert_eq!(terms.total, terms.reconstruction);
        let grad = elbo_grad(&x, &r, &skewed, 0.0, ReconLoss::SumSquares);
        assert!(grad.d_relaxed.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_total_weights_kl_by_beta() {
        let x = array![[1.0]];
        let r = array![[0.0]];
        let skewed = Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap();
        let terms = elbo(&x, &r, &skewed, 2.5, ReconLoss::SumSquares);
        assert!((terms.total - (terms.reconstruction + 2.5 * terms.kl)).abs() < 1e-6);
    }
}
