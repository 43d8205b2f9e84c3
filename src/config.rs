//! Model configuration and crate-wide defaults.
//!
//! The four sizing parameters (`input_size`, `word_length`,
//! `dictionary_size`, `temperature`) are fixed for the lifetime of a model.
//! They travel inside every checkpoint so a snapshot can only be restored
//! into a model of identical shape.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

/// Default relaxed-categorical temperature.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Default β weight on the KL term.
pub const DEFAULT_BETA: f32 = 1.0;

/// Default RNG seed used when none is supplied.
pub const DEFAULT_SEED: u64 = 0x1A4C_0DE5;

/// Constant written into the forget-gate slice of recurrent biases for cell
/// variants that have one.
pub const FORGET_GATE_BIAS: f32 = 1.0;

/// Gain for rectified-linear layers (kaiming).
pub const RELU_GAIN: f32 = std::f32::consts::SQRT_2;

/// Gain for tanh-like saturating layers (kaiming).
pub const TANH_GAIN: f32 = 5.0 / 3.0;

/// Checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Reconstruction error used by the ELBO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReconLoss {
    /// Summed squared error.
    #[default]
    SumSquares,
    /// Binary cross-entropy on logits, summed.
    CrossEntropy,
}

impl FromStr for ReconLoss {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" | "sse" | "sum-squares" => Ok(ReconLoss::SumSquares),
            "bce" | "cross-entropy" | "ce" => Ok(ReconLoss::CrossEntropy),
            other => bail!(
                "unknown reconstruction loss '{}' (expected 'mse' or 'bce')",
                other
            ),
        }
    }
}

impl fmt::Display for ReconLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconLoss::SumSquares => write!(f, "mse"),
            ReconLoss::CrossEntropy => write!(f, "bce"),
        }
    }
}

/// Where batch work is dispatched. Parameter math is always on the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    /// Single thread.
    #[default]
    Cpu,
    /// Batch-parallel evaluation across rayon workers.
    Threaded,
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "threaded" | "rayon" => Ok(Device::Threaded),
            other => bail!("unknown device '{}' (expected 'cpu' or 'threaded')", other),
        }
    }
}

/// Construction parameters for [`crate::model::vae::DiscreteVae`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaeConfig {
    /// Dimension of input vectors and of both recurrent hidden states.
    pub input_size: usize,

    /// Number of symbols per message.
    pub word_length: usize,

    /// Vocabulary size per symbol.
    pub dictionary_size: usize,

    /// Relaxed-categorical temperature (training mode only).
    pub temperature: f32,

    /// Reconstruction term of the ELBO.
    pub recon_loss: ReconLoss,

    /// Dispatch target for batch-parallel work.
    pub device: Device,

    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            input_size: 16,
            word_length: 4,
            dictionary_size: 8,
            temperature: DEFAULT_TEMPERATURE,
            recon_loss: ReconLoss::SumSquares,
            device: Device::Cpu,
            seed: DEFAULT_SEED,
        }
    }
}

impl VaeConfig {
    pub fn new(input_size: usize, word_length: usize, dictionary_size: usize) -> Self {
        Self {
            input_size,
            word_length,
            dictionary_size,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_recon_loss(mut self, recon_loss: ReconLoss) -> Self {
        self.recon_loss = recon_loss;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject configurations that cannot produce a model.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.input_size > 0, "input_size must be positive");
        ensure!(self.word_length > 0, "word_length must be positive");
        ensure!(self.dictionary_size > 0, "dictionary_size must be positive");
        ensure!(
            self.temperature.is_finite() && self.temperature > 0.0,
            "temperature must be finite and positive, got {}",
            self.temperature
        );
        Ok(())
    }

    /// Whether `other` has identical sizing parameters.
    pub fn same_shape(&self, other: &VaeConfig) -> bool {
        self.input_size == other.input_size
            && self.word_length == other.word_length
            && self.dictionary_size == other.dictionary_size
    }
}
