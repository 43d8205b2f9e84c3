//! Unrolled GRU recurrence as an explicit state machine.
//!
//! States are `Step(0) .. Step(word_length − 1)` followed by `Terminal`; each
//! transition is one cell application. The encoder and decoder share this
//! driver and differ only in their [`CollectPolicy`] and in what they feed
//! back as the next input.

use ndarray::Array2;

use crate::core::gru::{GruCell, GruStepCache};

/// Which hidden states an unroll exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectPolicy {
    /// Every post-step hidden state (encoder).
    EveryStep,
    /// Only the final hidden state (decoder).
    TerminalOnly,
}

/// Position of an unroll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The next transition will be step `i`.
    Step(usize),
    Terminal,
}

/// In-flight unroll over a fixed number of steps.
pub struct Unroll<'a> {
    cell: &'a GruCell,
    steps: usize,
    phase: Phase,
    policy: CollectPolicy,
    hidden: Array2<f32>,
    collected: Vec<Array2<f32>>,
    caches: Vec<GruStepCache>,
}

/// A finished unroll.
pub struct Unrolled {
    /// Hidden states selected by the policy, in step order.
    pub outputs: Vec<Array2<f32>>,

    /// Hidden state after the last step.
    pub final_hidden: Array2<f32>,

    /// Per-step caches for [`reverse`].
    pub caches: Vec<GruStepCache>,
}

impl<'a> Unroll<'a> {
    pub fn new(cell: &'a GruCell, initial_hidden: Array2<f32>, steps: usize, policy: CollectPolicy) -> Self {
        let phase = if steps == 0 { Phase::Terminal } else { Phase::Step(0) };
        Self {
            cell,
            steps,
            phase,
            policy,
            hidden: initial_hidden,
            collected: Vec::with_capacity(steps),
            caches: Vec::with_capacity(steps),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply one transition with `input`, returning the new hidden state.
    ///
    /// Returns `None` once the machine is terminal.
    pub fn advance(&mut self, input: &Array2<f32>) -> Option<&Array2<f32>> {
        let step = match self.phase {
            Phase::Step(i) => i,
            Phase::Terminal => return None,
        };

        let (next, cache) = self.cell.step(input, &self.hidden);
        self.caches.push(cache);
        self.hidden = next;

        let last = step + 1 == self.steps;
        if self.policy == CollectPolicy::EveryStep || last {
            self.collected.push(self.hidden.clone());
        }
        self.phase = if last { Phase::Terminal } else { Phase::Step(step + 1) };
        Some(&self.hidden)
    }

    pub fn finish(self) -> Unrolled {
        Unrolled {
            outputs: self.collected,
            final_hidden: self.hidden,
            caches: self.caches,
        }
    }
}

/// Callbacks for [`reverse`].
pub trait ReverseHooks {
    /// Extra `∂L/∂h_t` entering at step `t` from outside the recurrence.
    fn hidden_grad(&mut self, step: usize) -> Option<Array2<f32>>;

    /// `∂L/∂x_t` for the input consumed at step `t`.
    fn input_grad(&mut self, step: usize, d_input: Array2<f32>);
}

/// Backpropagate through an unroll from the last step to the first.
///
/// Accumulates cell gradients into `grad` and returns `∂L/∂h_init`.
pub fn reverse<H: ReverseHooks>(
    cell: &GruCell,
    caches: &[GruStepCache],
    grad: &mut GruCell,
    hooks: &mut H,
) -> Option<Array2<f32>> {
    let mut carry: Option<Array2<f32>> = None;
    for (step, cache) in caches.iter().enumerate().rev() {
        let dh = match (carry.take(), hooks.hidden_grad(step)) {
            (Some(c), Some(extra)) => c + extra,
            (Some(c), None) => c,
            (None, Some(extra)) => extra,
            (None, None) => Array2::zeros(cache.hidden.raw_dim()),
        };
        let (d_input, d_hidden) = cell.backward_step(cache, &dh, grad);
        hooks.input_grad(step, d_input);
        carry = Some(d_hidden);
    }
    carry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        terminal: usize,
        seeds: Vec<usize>,
        inputs: Vec<usize>,
    }

    impl ReverseHooks for Recorder {
        fn hidden_grad(&mut self, step: usize) -> Option<Array2<f32>> {
            self.seeds.push(step);
            (step == self.terminal).then(|| Array2::ones((1, 2)))
        }

        fn input_grad(&mut self, step: usize, _d_input: Array2<f32>) {
            self.inputs.push(step);
        }
    }

    #[test]
    fn test_phases_advance_to_terminal() {
        let cell = GruCell::zeros(2, 2);
        let mut m = Unroll::new(&cell, Array2::zeros((1, 2)), 3, CollectPolicy::EveryStep);
        let x = Array2::zeros((1, 2));
        assert_eq!(m.phase(), Phase::Step(0));
        m.advance(&x);
        assert_eq!(m.phase(), Phase::Step(1));
        m.advance(&x);
        m.advance(&x);
        assert_eq!(m.phase(), Phase::Terminal);
        assert!(m.advance(&x).is_none());
        let done = m.finish();
        assert_eq!(done.outputs.len(), 3);
        assert_eq!(done.caches.len(), 3);
    }

    #[test]
    fn test_terminal_only_collects_last() {
        let cell = GruCell::zeros(2, 2);
        let h0 = Array2::from_elem((1, 2), 1.0);
        let mut m = Unroll::new(&cell, h0, 3, CollectPolicy::TerminalOnly);
        let x = Array2::zeros((1, 2));
        while m.phase() != Phase::Terminal {
            m.advance(&x);
        }
        let done = m.finish();
        assert_eq!(done.outputs.len(), 1);
        // Zero weights halve the hidden state each step.
        assert!((done.final_hidden[[0, 0]] - 0.125).abs() < 1e-6);
        assert_eq!(done.outputs[0], done.final_hidden);
    }

    #[test]
    fn test_reverse_visits_steps_backwards() {
        let cell = GruCell::zeros(2, 2);
        let mut m = Unroll::new(&cell, Array2::from_elem((1, 2), 1.0), 3, CollectPolicy::TerminalOnly);
        let x = Array2::zeros((1, 2));
        while m.advance(&x).is_some() {}
        let done = m.finish();

        let mut grad = GruCell::zeros(2, 2);
        let mut hooks = Recorder {
            terminal: 2,
            seeds: Vec::new(),
            inputs: Vec::new(),
        };
        let dh0 = reverse(&cell, &done.caches, &mut grad, &mut hooks).unwrap();
        assert_eq!(hooks.seeds, vec![2, 1, 0]);
        assert_eq!(hooks.inputs, vec![2, 1, 0]);
        // h_L = h_0 / 8 with zero weights
        assert!((dh0[[0, 0]] - 0.125).abs() < 1e-6);
    }
}
