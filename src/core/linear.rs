//! Affine projection `y = x · Wᵀ + b` over a batch of row vectors.

use ndarray::{Array1, Array2, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use super::layer::{Layer, LayerRole, ParamKind, ParamSlot};

/// Linear layer weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// W ∈ R^{out × in}
    pub weight: Array2<f32>,

    /// b ∈ R^{out}
    pub bias: Array1<f32>,
}

impl Linear {
    /// Zero-initialised layer (also used as a gradient accumulator).
    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            weight: Array2::zeros((out_dim, in_dim)),
            bias: Array1::zeros(out_dim),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// `x`: [batch, in] → [batch, out]
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }

    /// Accumulate parameter gradients into `grad` and return `∂L/∂x`.
    ///
    /// `x` is the input seen on the forward pass, `dy` is `∂L/∂y`.
    pub fn backward(&self, x: &Array2<f32>, dy: &Array2<f32>, grad: &mut Linear) -> Array2<f32> {
        grad.weight += &dy.t().dot(x);
        grad.bias += &dy.sum_axis(Axis(0));
        dy.dot(&self.weight)
    }
}

impl Layer for Linear {
    fn role(&self) -> LayerRole {
        LayerRole::Linear
    }

    fn slots(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("weight", self.weight.view().into_dyn()),
            ("bias", self.bias.view().into_dyn()),
        ]
    }

    fn slots_mut(&mut self) -> Vec<ParamSlot<'_>> {
        vec![
            ParamSlot {
                kind: ParamKind::Weight,
                tensor: self.weight.view_mut().into_dyn(),
            },
            ParamSlot {
                kind: ParamKind::Bias,
                tensor: self.bias.view_mut().into_dyn(),
            },
        ]
    }
}
