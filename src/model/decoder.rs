//! Decoder: symbol sequence → reconstruction.
//!
//! Every one-hot symbol is embedded up front, then a second GRU reduces the
//! embedded sequence to its final hidden state. Intermediate states are not
//! kept as outputs.
//!
//! ```text
//! e_t    = token_to_hidden(o_t)         for all t at once
//! h₀     = 0
//! h_t    = GRU_dec(e_t, h_{t−1})
//! μ      = output_mean(h_L)
//! logvar = output_logvar(h_L)
//! x̂      = reparameterize(μ, logvar)
//! ```

use anyhow::Result;
use ndarray::{Array2, Array3, Axis};
use rand::Rng;

use crate::core::gru::{GruCell, GruStepCache};
use crate::core::linear::Linear;
use crate::core::mode::ExecutionMode;
use crate::sampling::reparam::{reparameterize, reparameterize_backward};

use super::recurrence::{reverse, CollectPolicy, ReverseHooks, Unroll};

/// Borrowed view of the decoder's layers.
pub struct DecoderStateMachine<'a> {
    pub token_to_hidden: &'a Linear,
    pub gru: &'a GruCell,
    pub output_mean: &'a Linear,
    pub output_logvar: &'a Linear,
}

/// Gradient accumulators for the decoder's layers.
pub struct DecoderGrads<'g> {
    pub token_to_hidden: &'g mut Linear,
    pub gru: &'g mut GruCell,
    pub output_mean: &'g mut Linear,
    pub output_logvar: &'g mut Linear,
}

/// Activations kept for the backward pass.
#[derive(Clone, Debug)]
pub struct DecoderTrace {
    /// Tokens flattened to [batch · L, V].
    pub flat_tokens: Array2<f32>,
    pub caches: Vec<GruStepCache>,
    pub final_hidden: Array2<f32>,
    pub logvar: Array2<f32>,
    pub noise: Option<Array2<f32>>,
}

/// Decoder result.
#[derive(Clone, Debug)]
pub struct Decoded {
    /// [batch, input_size]
    pub reconstruction: Array2<f32>,
    pub mean: Array2<f32>,
    pub logvar: Array2<f32>,
    pub trace: DecoderTrace,
}

impl<'a> DecoderStateMachine<'a> {
    /// Run the decoder on `tokens`: [batch, L, V]. Shapes are assumed valid.
    pub fn run<R: Rng + ?Sized>(
        &self,
        tokens: &Array3<f32>,
        mode: ExecutionMode,
        rng: &mut R,
    ) -> Result<Decoded> {
        let (batch, steps, vocab) = tokens.dim();
        let hidden_dim = self.gru.hidden_dim();

        let flat_tokens = tokens
            .as_standard_layout()
            .into_owned()
            .into_shape((batch * steps, vocab))?;
        let embedded = self
            .token_to_hidden
            .forward(&flat_tokens)
            .into_shape((batch, steps, hidden_dim))?;

        let mut machine = Unroll::new(
            self.gru,
            Array2::zeros((batch, hidden_dim)),
            steps,
            CollectPolicy::TerminalOnly,
        );
        for step_input in embedded.axis_iter(Axis(1)) {
            machine.advance(&step_input.to_owned());
        }
        let unrolled = machine.finish();

        let mean = self.output_mean.forward(&unrolled.final_hidden);
        let logvar = self.output_logvar.forward(&unrolled.final_hidden);
        let sample = reparameterize(&mean, &logvar, mode, rng);

        Ok(Decoded {
            reconstruction: sample.value,
            mean,
            logvar: logvar.clone(),
            trace: DecoderTrace {
                flat_tokens,
                caches: unrolled.caches,
                final_hidden: unrolled.final_hidden,
                logvar,
                noise: sample.noise,
            },
        })
    }

    /// Backpropagate `∂L/∂x̂` into the decoder and return `∂L/∂tokens`.
    pub fn backward(
        &self,
        trace: &DecoderTrace,
        d_reconstruction: &Array2<f32>,
        grads: DecoderGrads<'_>,
    ) -> Result<Array3<f32>> {
        let DecoderGrads {
            token_to_hidden,
            gru,
            output_mean,
            output_logvar,
        } = grads;
        let batch = trace.final_hidden.nrows();
        let steps = trace.caches.len();
        let hidden_dim = self.gru.hidden_dim();
        let vocab = trace.flat_tokens.ncols();

        let (d_mean, d_logvar) =
            reparameterize_backward(&trace.logvar, trace.noise.as_ref(), d_reconstruction);
        let d_final = self.output_mean.backward(&trace.final_hidden, &d_mean, output_mean)
            + self
                .output_logvar
                .backward(&trace.final_hidden, &d_logvar, output_logvar);

        let mut hooks = DecoderHooks {
            terminal: steps.saturating_sub(1),
            d_final: Some(d_final),
            d_embedded: Array3::zeros((batch, steps, hidden_dim)),
        };
        let _ = reverse(self.gru, &trace.caches, gru, &mut hooks);

        let d_flat = hooks.d_embedded.into_shape((batch * steps, hidden_dim))?;
        let d_tokens = self
            .token_to_hidden
            .backward(&trace.flat_tokens, &d_flat, token_to_hidden);
        Ok(d_tokens.into_shape((batch, steps, vocab))?)
    }
}

struct DecoderHooks {
    terminal: usize,
    d_final: Option<Array2<f32>>,
    d_embedded: Array3<f32>,
}

impl ReverseHooks for DecoderHooks {
    fn hidden_grad(&mut self, step: usize) -> Option<Array2<f32>> {
        if step == self.terminal {
            self.d_final.take()
        } else {
            None
        }
    }

    fn input_grad(&mut self, step: usize, d_input: Array2<f32>) {
        self.d_embedded.index_axis_mut(Axis(1), step).assign(&d_input);
    }
}
