//! Encoder: continuous vector → sequence of discrete symbols.
//!
//! ```text
//! h₀ = x                     (the input seeds the hidden state)
//! u₀ = 0
//! for t in 0..L:
//!     h_t      = GRU_enc(u_t, h_{t−1})
//!     logits_t = hidden_to_token(h_t)
//!     y_t      = gumbel_softmax(logits_t, T)   training with sampling
//!              | softmax(logits_t)             otherwise
//!     o_t, k_t = straight_through(y_t)
//!     u_{t+1}  = token_to_hidden(o_t)
//! ```
//!
//! Outputs are stacked batch-major: `[batch, word_length, dictionary_size]`.

use anyhow::Result;
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use crate::core::gru::{GruCell, GruStepCache};
use crate::core::linear::Linear;
use crate::core::mode::ExecutionMode;
use crate::sampling::relaxed::{relax, softmax_backward, Relaxation};
use crate::sampling::straight_through::{straight_through_backward, straight_through_discretize};

use super::recurrence::{reverse, CollectPolicy, ReverseHooks, Unroll};

/// Borrowed view of the encoder's layers.
pub struct EncoderStateMachine<'a> {
    pub gru: &'a GruCell,
    pub hidden_to_token: &'a Linear,
    pub token_to_hidden: &'a Linear,
    pub word_length: usize,
    pub temperature: f32,
}

/// Gradient accumulators for the encoder's layers.
pub struct EncoderGrads<'g> {
    pub gru: &'g mut GruCell,
    pub hidden_to_token: &'g mut Linear,
    pub token_to_hidden: &'g mut Linear,
}

/// Per-step activations kept for the backward pass.
#[derive(Clone, Debug)]
pub struct EncoderTrace {
    pub relaxation: Relaxation,
    pub caches: Vec<GruStepCache>,
    /// h_t after each step.
    pub hidden: Vec<Array2<f32>>,
    /// y_t per step.
    pub relaxed: Vec<Array2<f32>>,
    /// o_t per step.
    pub one_hot: Vec<Array2<f32>>,
}

/// Encoder result.
#[derive(Clone, Debug)]
pub struct Encoded {
    /// One-hot symbols: [batch, word_length, dictionary_size]
    pub discrete_tokens: Array3<f32>,

    /// Relaxed distributions: [batch, word_length, dictionary_size]
    pub relaxed: Array3<f32>,

    /// Symbol indices: [batch, word_length]
    pub symbols: Array2<usize>,

    pub trace: EncoderTrace,
}

impl<'a> EncoderStateMachine<'a> {
    /// Which relaxation a call in `mode` uses.
    pub fn relaxation(&self, mode: ExecutionMode, sampling: bool) -> Relaxation {
        if sampling && mode.is_training() {
            Relaxation::Gumbel {
                temperature: self.temperature,
            }
        } else {
            Relaxation::Softmax
        }
    }

    /// Run the encoder on `x`: [batch, input_size]. Shapes are assumed valid.
    pub fn run<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        mode: ExecutionMode,
        sampling: bool,
        rng: &mut R,
    ) -> Result<Encoded> {
        let relaxation = self.relaxation(mode, sampling);
        let batch = x.nrows();
        let mut machine = Unroll::new(self.gru, x.clone(), self.word_length, CollectPolicy::EveryStep);
        let mut input = Array2::zeros((batch, self.token_to_hidden.out_dim()));

        let mut relaxed = Vec::with_capacity(self.word_length);
        let mut one_hot = Vec::with_capacity(self.word_length);
        let mut indices = Vec::with_capacity(self.word_length);

        while let Some(hidden) = machine.advance(&input) {
            let logits = self.hidden_to_token.forward(hidden);
            let y = relax(&logits, relaxation, rng);
            let symbols = straight_through_discretize(&y);
            input = self.token_to_hidden.forward(&symbols.one_hot);
            relaxed.push(y);
            one_hot.push(symbols.one_hot);
            indices.push(symbols.index);
        }
        let unrolled = machine.finish();

        let discrete_tokens = stack_steps(&one_hot)?;
        let relaxed_tokens = stack_steps(&relaxed)?;
        let index_views: Vec<_> = indices.iter().map(|v| v.view()).collect();
        let symbols = stack(Axis(1), &index_views)?;

        Ok(Encoded {
            discrete_tokens,
            relaxed: relaxed_tokens,
            symbols,
            trace: EncoderTrace {
                relaxation,
                caches: unrolled.caches,
                hidden: unrolled.outputs,
                relaxed,
                one_hot,
            },
        })
    }

    /// Backpropagate into the encoder's layers.
    ///
    /// `d_tokens` is `∂L/∂discrete_tokens` (from the decoder), `d_relaxed` is
    /// `∂L/∂relaxed` (from the KL term); both `[batch, L, V]`.
    pub fn backward(
        &self,
        trace: &EncoderTrace,
        d_tokens: &Array3<f32>,
        d_relaxed: &Array3<f32>,
        grads: EncoderGrads<'_>,
    ) {
        let EncoderGrads {
            gru,
            hidden_to_token,
            token_to_hidden,
        } = grads;
        let mut hooks = EncoderHooks {
            machine: self,
            trace,
            d_tokens,
            d_relaxed,
            hidden_to_token,
            token_to_hidden,
            pending_feedback: None,
        };
        // ∂L/∂h₀ lands on the input data and is not needed.
        let _ = reverse(self.gru, &trace.caches, gru, &mut hooks);
    }
}

struct EncoderHooks<'m, 'g> {
    machine: &'m EncoderStateMachine<'m>,
    trace: &'m EncoderTrace,
    d_tokens: &'m Array3<f32>,
    d_relaxed: &'m Array3<f32>,
    hidden_to_token: &'g mut Linear,
    token_to_hidden: &'g mut Linear,
    /// ∂L/∂u_{t+1}, delivered by the step after the current one.
    pending_feedback: Option<Array2<f32>>,
}

impl ReverseHooks for EncoderHooks<'_, '_> {
    fn hidden_grad(&mut self, step: usize) -> Option<Array2<f32>> {
        let one_hot = &self.trace.one_hot[step];
        let mut d_one_hot = self.d_tokens.index_axis(Axis(1), step).to_owned();
        if let Some(d_feedback) = self.pending_feedback.take() {
            d_one_hot += &self
                .machine
                .token_to_hidden
                .backward(one_hot, &d_feedback, self.token_to_hidden);
        }

        let d_y = straight_through_backward(&d_one_hot) + &self.d_relaxed.index_axis(Axis(1), step);
        let d_logits = softmax_backward(
            &self.trace.relaxed[step],
            &d_y,
            self.trace.relaxation.inverse_temperature(),
        );
        Some(self.machine.hidden_to_token.backward(
            &self.trace.hidden[step],
            &d_logits,
            self.hidden_to_token,
        ))
    }

    fn input_grad(&mut self, step: usize, d_input: Array2<f32>) {
        // u₀ is a constant zero vector
        if step > 0 {
            self.pending_feedback = Some(d_input);
        }
    }
}

/// Stack per-step [batch, V] matrices into [batch, L, V].
fn stack_steps(steps: &[Array2<f32>]) -> Result<Array3<f32>> {
    let views: Vec<ArrayView2<'_, f32>> = steps.iter().map(|s| s.view()).collect();
    Ok(stack(Axis(1), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::params::VaeParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(seed: u64) -> VaeParams {
        let mut p = VaeParams::zeros(4, 3);
        p.initialize(&mut StdRng::seed_from_u64(seed));
        p
    }

    fn machine(p: &VaeParams) -> EncoderStateMachine<'_> {
        EncoderStateMachine {
            gru: &p.encoder_gru,
            hidden_to_token: &p.hidden_to_token,
            token_to_hidden: &p.token_to_hidden,
            word_length: 2,
            temperature: 1.0,
        }
    }

    #[test]
    fn test_encode_shapes() {
        let p = params(0);
        let enc = machine(&p);
        let x = Array2::from_elem((5, 4), 0.3);
        let out = enc.run(&x, ExecutionMode::Training, true, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(out.discrete_tokens.dim(), (5, 2, 3));
        assert_eq!(out.relaxed.dim(), (5, 2, 3));
        assert_eq!(out.symbols.dim(), (5, 2));
        assert_eq!(out.trace.caches.len(), 2);
    }

    #[test]
    fn test_symbols_match_one_hot() {
        let p = params(2);
        let enc = machine(&p);
        let x = Array2::from_shape_fn((6, 4), |(i, j)| (i as f32 - j as f32) * 0.4);
        let out = enc.run(&x, ExecutionMode::Training, true, &mut StdRng::seed_from_u64(3)).unwrap();
        for b in 0..6 {
            for t in 0..2 {
                let row = out.discrete_tokens.slice(ndarray::s![b, t, ..]);
                assert_eq!(row.sum(), 1.0);
                assert_eq!(row[out.symbols[[b, t]]], 1.0);
                let relaxed = out.relaxed.slice(ndarray::s![b, t, ..]);
                assert!((relaxed.sum() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_eval_is_deterministic() {
        let p = params(4);
        let enc = machine(&p);
        let x = Array2::from_elem((2, 4), -0.2);
        let a = enc.run(&x, ExecutionMode::Evaluation, true, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = enc.run(&x, ExecutionMode::Evaluation, true, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a.relaxed, b.relaxed);
        assert_eq!(a.symbols, b.symbols);
        assert_eq!(a.trace.relaxation, Relaxation::Softmax);
    }

    #[test]
    fn test_sampling_disabled_uses_softmax() {
        let p = params(5);
        let enc = machine(&p);
        assert_eq!(enc.relaxation(ExecutionMode::Training, false), Relaxation::Softmax);
        assert_eq!(
            enc.relaxation(ExecutionMode::Training, true),
            Relaxation::Gumbel { temperature: 1.0 }
        );
    }

    #[test]
    fn test_backward_fills_encoder_grads() {
        let p = params(6);
        let enc = machine(&p);
        let x = Array2::from_elem((3, 4), 0.5);
        let out = enc.run(&x, ExecutionMode::Training, true, &mut StdRng::seed_from_u64(7)).unwrap();

        let mut g = p.zeros_like();
        let d_tokens = Array3::from_elem((3, 2, 3), 0.1);
        let d_relaxed = Array3::from_shape_fn((3, 2, 3), |(_, _, k)| k as f32 - 1.0);
        enc.backward(
            &out.trace,
            &d_tokens,
            &d_relaxed,
            EncoderGrads {
                gru: &mut g.encoder_gru,
                hidden_to_token: &mut g.hidden_to_token,
                token_to_hidden: &mut g.token_to_hidden,
            },
        );
        assert!(g.all_finite());
        assert!(g.hidden_to_token.weight.iter().any(|&v| v != 0.0));
        assert!(g.encoder_gru.weight_hh.iter().any(|&v| v != 0.0));
        // Feedback from step 1 reaches the embedding of step 0's symbol.
        assert!(g.token_to_hidden.weight.iter().any(|&v| v != 0.0));
        assert!(g.decoder_gru.weight_ih.iter().all(|&v| v == 0.0));
    }

    /// Compare the embedding gradient from `backward` with central
    /// differences of L = Σ y ⊙ c. With two steps and no token gradient the
    /// embedding reaches L only through u₁, so both must agree exactly.
    fn assert_feedback_gradient(mode: ExecutionMode, temperature: f32) {
        let p = params(9);
        let x = Array2::from_shape_fn((3, 4), |(i, j)| 0.3 * i as f32 - 0.2 * j as f32);
        let c = Array3::from_shape_fn((3, 2, 3), |(b, t, k)| 0.4 * k as f32 - 0.3 * t as f32 + 0.1 * b as f32);
        let run = |p: &VaeParams| {
            let enc = EncoderStateMachine {
                temperature,
                ..machine(p)
            };
            // Reseeding replays identical Gumbel noise.
            enc.run(&x, mode, true, &mut StdRng::seed_from_u64(21)).unwrap()
        };
        let loss = |p: &VaeParams| (&run(p).relaxed * &c).sum();

        let out = run(&p);
        let mut g = p.zeros_like();
        EncoderStateMachine {
            temperature,
            ..machine(&p)
        }
        .backward(
            &out.trace,
            &Array3::zeros((3, 2, 3)),
            &c,
            EncoderGrads {
                gru: &mut g.encoder_gru,
                hidden_to_token: &mut g.hidden_to_token,
                token_to_hidden: &mut g.token_to_hidden,
            },
        );

        let eps = 1e-2;
        let check = |analytic: f32, edit: &dyn Fn(&mut VaeParams, f32)| {
            let mut plus = p.clone();
            edit(&mut plus, eps);
            let mut minus = p.clone();
            edit(&mut minus, -eps);
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!(
                (analytic - numeric).abs() < 2e-3 + 5e-2 * numeric.abs(),
                "analytic {} vs numeric {}",
                analytic,
                numeric
            );
        };
        for i in 0..g.token_to_hidden.bias.len() {
            check(g.token_to_hidden.bias[i], &|q: &mut VaeParams, d: f32| q.token_to_hidden.bias[i] += d);
        }
        for ((r, k), &analytic) in g.token_to_hidden.weight.indexed_iter() {
            check(analytic, &|q: &mut VaeParams, d: f32| q.token_to_hidden.weight[[r, k]] += d);
        }
        assert!(g.token_to_hidden.bias.iter().any(|v| v.abs() > 1e-4));
    }

    #[test]
    fn test_feedback_gradient_matches_finite_difference() {
        assert_feedback_gradient(ExecutionMode::Evaluation, 1.0);
    }

    #[test]
    fn test_gumbel_gradient_scaled_by_inverse_temperature() {
        assert_feedback_gradient(ExecutionMode::Training, 0.5);
    }
}
