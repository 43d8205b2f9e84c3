//! Adam optimiser.
//!
//! ```text
//! m ← β₁·m + (1 − β₁)·g
//! v ← β₂·v + (1 − β₂)·g²
//! θ ← θ − lr · (m / (1 − β₁ᵗ)) / (sqrt(v / (1 − β₂ᵗ)) + ε)
//! ```

use ndarray::Zip;

use crate::model::params::{VaeGrads, VaeParams};

/// Adam hyper-parameters.
#[derive(Clone, Debug)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Optimiser state: first and second moments shaped like the parameters.
pub struct Adam {
    pub config: AdamConfig,
    first_moment: VaeParams,
    second_moment: VaeParams,
    step: u64,
}

impl Adam {
    pub fn new(config: AdamConfig, params: &VaeParams) -> Self {
        Self {
            config,
            first_moment: params.zeros_like(),
            second_moment: params.zeros_like(),
            step: 0,
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Apply one update to `params` from `grads`.
    pub fn step(&mut self, params: &mut VaeParams, grads: &VaeGrads) {
        self.step += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let bias1 = 1.0 - beta1.powi(self.step as i32);
        let bias2 = 1.0 - beta2.powi(self.step as i32);

        let layers = params
            .layers_mut()
            .into_iter()
            .zip(self.first_moment.layers_mut())
            .zip(self.second_moment.layers_mut())
            .zip(grads.layers());
        for ((((_, p), (_, m)), (_, v)), (_, g)) in layers {
            let slots = p
                .slots_mut()
                .into_iter()
                .zip(m.slots_mut())
                .zip(v.slots_mut())
                .zip(g.slots());
            for (((p, m), v), (_, g)) in slots {
                Zip::from(p.tensor)
                    .and(m.tensor)
                    .and(v.tensor)
                    .and(&g)
                    .for_each(|p, m, v, &g| {
                        *m = beta1 * *m + (1.0 - beta1) * g;
                        *v = beta2 * *v + (1.0 - beta2) * g * g;
                        let m_hat = *m / bias1;
                        let v_hat = *v / bias2;
                        *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                    });
            }
        }
    }
}
