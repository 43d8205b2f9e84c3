//! The complete learned parameter set, keyed by layer.
//!
//! The same type doubles as the gradient container so a parameter set, its
//! gradient and any optimiser moments can be walked in lock-step.

use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};

use crate::core::gru::GruCell;
use crate::core::init::InitPolicy;
use crate::core::layer::Layer;
use crate::core::linear::Linear;

/// Two GRU cells and four linear projections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaeParams {
    /// Encoder recurrence: input_size → input_size.
    pub encoder_gru: GruCell,

    /// Hidden state → vocabulary logits.
    pub hidden_to_token: Linear,

    /// One-hot symbol → hidden space. Shared by encoder feedback and decoder.
    pub token_to_hidden: Linear,

    /// Decoder recurrence: input_size → input_size.
    pub decoder_gru: GruCell,

    /// Final decoder hidden → reconstruction mean.
    pub output_mean: Linear,

    /// Final decoder hidden → reconstruction log-variance.
    pub output_logvar: Linear,
}

/// Gradients share the parameter layout.
pub type VaeGrads = VaeParams;

impl VaeParams {
    pub fn zeros(input_size: usize, dictionary_size: usize) -> Self {
        Self {
            encoder_gru: GruCell::zeros(input_size, input_size),
            hidden_to_token: Linear::zeros(input_size, dictionary_size),
            token_to_hidden: Linear::zeros(dictionary_size, input_size),
            decoder_gru: GruCell::zeros(input_size, input_size),
            output_mean: Linear::zeros(input_size, input_size),
            output_logvar: Linear::zeros(input_size, input_size),
        }
    }

    /// Zeroed set with the same shapes as `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.encoder_gru.hidden_dim(), self.hidden_to_token.out_dim())
    }

    /// Layers in a fixed order.
    pub fn layers(&self) -> [(&'static str, &dyn Layer); 6] {
        [
            ("encoder_gru", &self.encoder_gru),
            ("hidden_to_token", &self.hidden_to_token),
            ("token_to_hidden", &self.token_to_hidden),
            ("decoder_gru", &self.decoder_gru),
            ("output_mean", &self.output_mean),
            ("output_logvar", &self.output_logvar),
        ]
    }

    /// Mutable layers, same order as [`VaeParams::layers`].
    pub fn layers_mut(&mut self) -> [(&'static str, &mut dyn Layer); 6] {
        [
            ("encoder_gru", &mut self.encoder_gru),
            ("hidden_to_token", &mut self.hidden_to_token),
            ("token_to_hidden", &mut self.token_to_hidden),
            ("decoder_gru", &mut self.decoder_gru),
            ("output_mean", &mut self.output_mean),
            ("output_logvar", &mut self.output_logvar),
        ]
    }

    /// Every tensor as `("layer.param", view)`.
    pub fn named_tensors(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        self.layers()
            .into_iter()
            .flat_map(|(layer_name, layer)| {
                layer
                    .slots()
                    .into_iter()
                    .map(move |(param, view)| (format!("{}.{}", layer_name, param), view))
            })
            .collect()
    }

    /// Run the initialisation policy over every layer.
    pub fn initialize<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) {
        let policy = InitPolicy;
        for (_, layer) in self.layers_mut() {
            policy.apply(layer, rng);
        }
    }

    pub fn param_count(&self) -> usize {
        self.layers().iter().map(|(_, l)| l.param_count()).sum()
    }

    /// Whether every entry is finite (no NaN / Inf).
    pub fn all_finite(&self) -> bool {
        self.named_tensors()
            .iter()
            .all(|(_, t)| t.iter().all(|v| v.is_finite()))
    }

    /// Names of tensors holding at least one non-finite entry.
    pub fn non_finite(&self) -> Vec<String> {
        self.named_tensors()
            .into_iter()
            .filter(|(_, t)| t.iter().any(|v| !v.is_finite()))
            .map(|(name, _)| name)
            .collect()
    }

    /// L2 norm over all tensors.
    pub fn global_norm(&self) -> f32 {
        self.named_tensors()
            .iter()
            .map(|(_, t)| t.iter().map(|v| v * v).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}
