//! Gated recurrent unit cell.
//!
//! Gate layout follows the common `[reset | update | new]` stacking, so each
//! weight matrix holds three `hidden × ·` blocks:
//!
//! ```text
//! gi = x · W_ihᵀ + b_ih                  ∈ R^{3H}
//! gh = h · W_hhᵀ + b_hh                  ∈ R^{3H}
//! r  = σ(gi_r + gh_r)                    (reset gate)
//! z  = σ(gi_z + gh_z)                    (update gate)
//! n  = tanh(gi_n + r ⊙ gh_n)             (candidate)
//! h' = (1 − z) ⊙ n + z ⊙ h
//! ```
//!
//! The cell has no forget gate, so the forget-bias rule of the
//! initialisation policy never touches it.

use ndarray::{concatenate, s, Array1, Array2, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use super::layer::{Layer, LayerRole, ParamKind, ParamSlot};

/// GRU cell weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GruCell {
    /// W_ih ∈ R^{3H × in}
    pub weight_ih: Array2<f32>,

    /// W_hh ∈ R^{3H × H}
    pub weight_hh: Array2<f32>,

    /// b_ih ∈ R^{3H}
    pub bias_ih: Array1<f32>,

    /// b_hh ∈ R^{3H}
    pub bias_hh: Array1<f32>,
}

/// Activations saved by [`GruCell::step`] for the backward pass.
#[derive(Clone, Debug)]
pub struct GruStepCache {
    pub input: Array2<f32>,
    pub hidden: Array2<f32>,
    pub reset: Array2<f32>,
    pub update: Array2<f32>,
    pub candidate: Array2<f32>,
    /// `gh_n`, the hidden contribution to the candidate before gating.
    pub hidden_new: Array2<f32>,
}

impl GruCell {
    /// Zero-initialised cell (also used as a gradient accumulator).
    pub fn zeros(input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            weight_ih: Array2::zeros((3 * hidden_dim, input_dim)),
            weight_hh: Array2::zeros((3 * hidden_dim, hidden_dim)),
            bias_ih: Array1::zeros(3 * hidden_dim),
            bias_hh: Array1::zeros(3 * hidden_dim),
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.weight_hh.ncols()
    }

    /// One recurrence step over a batch.
    ///
    /// `x`: [batch, in], `h`: [batch, H] → (h': [batch, H], cache)
    pub fn step(&self, x: &Array2<f32>, h: &Array2<f32>) -> (Array2<f32>, GruStepCache) {
        let hd = self.hidden_dim();
        let gi = x.dot(&self.weight_ih.t()) + &self.bias_ih;
        let gh = h.dot(&self.weight_hh.t()) + &self.bias_hh;

        let reset = (&gi.slice(s![.., 0..hd]) + &gh.slice(s![.., 0..hd])).mapv(sigmoid);
        let update = (&gi.slice(s![.., hd..2 * hd]) + &gh.slice(s![.., hd..2 * hd])).mapv(sigmoid);
        let hidden_new = gh.slice(s![.., 2 * hd..]).to_owned();
        let candidate = (&gi.slice(s![.., 2 * hd..]) + &(&reset * &hidden_new)).mapv(f32::tanh);

        let next = (1.0 - &update) * &candidate + &update * h;

        let cache = GruStepCache {
            input: x.clone(),
            hidden: h.clone(),
            reset,
            update,
            candidate,
            hidden_new,
        };
        (next, cache)
    }

    /// Reverse one [`GruCell::step`].
    ///
    /// Accumulates parameter gradients into `grad` and returns
    /// `(∂L/∂x, ∂L/∂h)` given `dh_next = ∂L/∂h'`.
    pub fn backward_step(
        &self,
        cache: &GruStepCache,
        dh_next: &Array2<f32>,
        grad: &mut GruCell,
    ) -> (Array2<f32>, Array2<f32>) {
        let GruStepCache {
            input,
            hidden,
            reset,
            update,
            candidate,
            hidden_new,
        } = cache;

        let d_candidate = dh_next * &(1.0 - update);
        let d_update = dh_next * &(hidden - candidate);
        let dh_direct = dh_next * update;

        let dn_pre = d_candidate * &candidate.mapv(|n| 1.0 - n * n);
        let d_reset = &dn_pre * hidden_new;
        let dgh_n = &dn_pre * reset;

        let dr_pre = d_reset * &reset.mapv(|r| r * (1.0 - r));
        let dz_pre = d_update * &update.mapv(|z| z * (1.0 - z));

        let dgi = concatenate![Axis(1), dr_pre, dz_pre, dn_pre];
        let dgh = concatenate![Axis(1), dr_pre, dz_pre, dgh_n];

        grad.weight_ih += &dgi.t().dot(input);
        grad.bias_ih += &dgi.sum_axis(Axis(0));
        grad.weight_hh += &dgh.t().dot(hidden);
        grad.bias_hh += &dgh.sum_axis(Axis(0));

        let dx = dgi.dot(&self.weight_ih);
        let dh = dh_direct + dgh.dot(&self.weight_hh);
        (dx, dh)
    }
}

impl Layer for GruCell {
    fn role(&self) -> LayerRole {
        LayerRole::RecurrentWithoutForgetGate
    }

    fn slots(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("weight_ih", self.weight_ih.view().into_dyn()),
            ("weight_hh", self.weight_hh.view().into_dyn()),
            ("bias_ih", self.bias_ih.view().into_dyn()),
            ("bias_hh", self.bias_hh.view().into_dyn()),
        ]
    }

    fn slots_mut(&mut self) -> Vec<ParamSlot<'_>> {
        vec![
            ParamSlot {
                kind: ParamKind::Weight,
                tensor: self.weight_ih.view_mut().into_dyn(),
            },
            ParamSlot {
                kind: ParamKind::Weight,
                tensor: self.weight_hh.view_mut().into_dyn(),
            },
            ParamSlot {
                kind: ParamKind::Bias,
                tensor: self.bias_ih.view_mut().into_dyn(),
            },
            ParamSlot {
                kind: ParamKind::Bias,
                tensor: self.bias_hh.view_mut().into_dyn(),
            },
        ]
    }
}

/// Numerically stable logistic function.
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
