//! Execution mode threaded through every stochastic call.

use serde::{Deserialize, Serialize};

/// Training draws relaxed samples and reparameterisation noise; evaluation
/// is deterministic given the parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[default]
    Training,
    Evaluation,
}

impl ExecutionMode {
    pub fn is_training(&self) -> bool {
        matches!(self, ExecutionMode::Training)
    }
}
