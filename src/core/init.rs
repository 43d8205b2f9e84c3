//! Weight initialisation policy.
//!
//! Rules are dispatched on [`LayerRole`], never on concrete type:
//!
//! | role                          | weights                  | biases                         |
//! |-------------------------------|--------------------------|--------------------------------|
//! | `Linear`                      | kaiming normal, relu gain | zero                          |
//! | `RecurrentWithForgetGate`     | kaiming normal, tanh gain | zero, forget slice = 1        |
//! | `RecurrentWithoutForgetGate`  | kaiming normal, tanh gain | zero                          |
//!
//! Kaiming normal uses fan-in mode: `std = gain / sqrt(fan_in)` where
//! `fan_in` is the second dimension of the weight matrix.
//!
//! Re-applying the policy is always valid and draws a fresh initialisation.

use ndarray::{s, ArrayViewMutD, Ix1};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::{FORGET_GATE_BIAS, RELU_GAIN, TANH_GAIN};

use super::layer::{Layer, LayerRole, ParamKind};

/// Stateless initialiser; the randomness comes from the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitPolicy;

impl InitPolicy {
    /// Initialise every tensor of `layer` in place according to its role.
    pub fn apply<L: Layer + ?Sized, R: Rng + ?Sized>(&self, layer: &mut L, rng: &mut R) {
        let role = layer.role();
        for slot in layer.slots_mut() {
            let mut tensor = slot.tensor;
            match (role, slot.kind) {
                (LayerRole::Linear, ParamKind::Weight) => kaiming_normal(&mut tensor, RELU_GAIN, rng),
                (LayerRole::RecurrentWithForgetGate, ParamKind::Weight)
                | (LayerRole::RecurrentWithoutForgetGate, ParamKind::Weight) => {
                    kaiming_normal(&mut tensor, TANH_GAIN, rng)
                }
                (LayerRole::Linear, ParamKind::Bias)
                | (LayerRole::RecurrentWithoutForgetGate, ParamKind::Bias) => tensor.fill(0.0),
                (LayerRole::RecurrentWithForgetGate, ParamKind::Bias) => {
                    tensor.fill(0.0);
                    boost_forget_gate(&mut tensor);
                }
            }
        }
    }
}

/// Fill `tensor` from N(0, (gain / sqrt(fan_in))²).
pub fn kaiming_normal<R: Rng + ?Sized>(tensor: &mut ArrayViewMutD<'_, f32>, gain: f32, rng: &mut R) {
    let fan_in = fan_in(tensor);
    let std = gain / (fan_in as f32).sqrt();
    match Normal::new(0.0_f32, std) {
        Ok(dist) => tensor.mapv_inplace(|_| dist.sample(rng)),
        // fan_in of zero means an empty tensor; nothing to draw
        Err(_) => tensor.fill(0.0),
    }
}

fn fan_in(tensor: &ArrayViewMutD<'_, f32>) -> usize {
    let shape = tensor.shape();
    match shape.len() {
        0 => 1,
        1 => shape[0].max(1),
        _ => shape[1..].iter().product::<usize>().max(1),
    }
}

/// Gates stacked as `[input | forget | cell | output]`: the second quarter
/// of the bias vector is the forget gate.
fn boost_forget_gate(tensor: &mut ArrayViewMutD<'_, f32>) {
    let len = tensor.len();
    if let Ok(mut bias) = tensor.view_mut().into_dimensionality::<Ix1>() {
        bias.slice_mut(s![len / 4..len / 2]).fill(FORGET_GATE_BIAS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gru::GruCell;
    use crate::core::layer::ParamSlot;
    use crate::core::linear::Linear;
    use ndarray::{Array1, Array2, ArrayViewD};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Minimal LSTM-shaped parameter set to exercise the forget-gate branch.
    struct LstmShaped {
        weight: Array2<f32>,
        bias: Array1<f32>,
    }

    impl Layer for LstmShaped {
        fn role(&self) -> LayerRole {
            LayerRole::RecurrentWithForgetGate
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

    fn std_of(values: impl Iterator<Item = f32>) -> f32 {
        let v: Vec<f32> = values.collect();
        let n = v.len() as f32;
        let mean = v.iter().sum::<f32>() / n;
        (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n).sqrt()
    }

    #[test]
    fn test_linear_kaiming_scale_and_zero_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Linear::zeros(64, 256);
        layer.bias.fill(3.0);
        InitPolicy.apply(&mut layer, &mut rng);

        let expected = RELU_GAIN / 64.0_f32.sqrt();
        let measured = std_of(layer.weight.iter().copied());
        assert!((measured - expected).abs() < 0.1 * expected, "std = {}", measured);
        assert!(layer.bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_gru_uses_tanh_gain_without_forget_boost() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut cell = GruCell::zeros(32, 32);
        cell.bias_ih.fill(5.0);
        cell.bias_hh.fill(5.0);
        InitPolicy.apply(&mut cell, &mut rng);

        let expected = TANH_GAIN / 32.0_f32.sqrt();
        let measured = std_of(cell.weight_hh.iter().copied());
        assert!((measured - expected).abs() < 0.1 * expected, "std = {}", measured);
        assert!(cell.bias_ih.iter().all(|&b| b == 0.0));
        assert!(cell.bias_hh.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_forget_gate_branch_sets_second_quarter() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = LstmShaped {
            weight: Array2::zeros((16, 4)),
            bias: Array1::from_elem(16, 9.0),
        };
        InitPolicy.apply(&mut layer, &mut rng);

        for (i, &b) in layer.bias.iter().enumerate() {
            let expected = if (4..8).contains(&i) { FORGET_GATE_BIAS } else { 0.0 };
            assert_eq!(b, expected, "bias[{}]", i);
        }
        assert!(layer.weight.iter().any(|&w| w != 0.0));
    }

    #[test]
    fn test_reapply_draws_fresh_values() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut layer = Linear::zeros(8, 8);
        InitPolicy.apply(&mut layer, &mut rng);
        let first = layer.weight.clone();
        InitPolicy.apply(&mut layer, &mut rng);
        assert_ne!(first, layer.weight);
    }
}
