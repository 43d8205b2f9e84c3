//! Gaussian reparameterisation.
//!
//! ```text
//! training:    value = μ + exp(½ · logvar) ⊙ ε,   ε ~ N(0, I) fresh per call
//! evaluation:  value = μ
//! ```

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::core::mode::ExecutionMode;

/// A reparameterised draw and the noise that produced it.
#[derive(Clone, Debug)]
pub struct ReparamSample {
    pub value: Array2<f32>,

    /// `None` in evaluation mode.
    pub noise: Option<Array2<f32>>,
}

/// Draw `μ + σ ⊙ ε` in training mode, return `μ` in evaluation mode.
pub fn reparameterize<R: Rng + ?Sized>(
    mean: &Array2<f32>,
    logvar: &Array2<f32>,
    mode: ExecutionMode,
    rng: &mut R,
) -> ReparamSample {
    match mode {
        ExecutionMode::Training => {
            let noise: Array2<f32> =
                Array2::from_shape_simple_fn(mean.raw_dim(), || StandardNormal.sample(rng));
            let value = mean + &(logvar.mapv(|lv| (0.5 * lv).exp()) * &noise);
            ReparamSample {
                value,
                noise: Some(noise),
            }
        }
        ExecutionMode::Evaluation => ReparamSample {
            value: mean.clone(),
            noise: None,
        },
    }
}

/// `(∂L/∂μ, ∂L/∂logvar)` given `∂L/∂value`.
pub fn reparameterize_backward(
    logvar: &Array2<f32>,
    noise: Option<&Array2<f32>>,
    d_value: &Array2<f32>,
) -> (Array2<f32>, Array2<f32>) {
    let d_mean = d_value.clone();
    let d_logvar = match noise {
        Some(eps) => d_value * eps * &logvar.mapv(|lv| 0.5 * (0.5 * lv).exp()),
        None => Array2::zeros(logvar.raw_dim()),
    };
    (d_mean, d_logvar)
}
