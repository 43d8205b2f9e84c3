//! # langcoder
//!
//! A variational autoencoder whose latent code is a short sequence of
//! discrete symbols drawn from a fixed-size dictionary.
//!
//! ## Components
//!
//! 1. **Encoder**: GRU unroll that emits one relaxed categorical sample per
//!    step and discretises it with a straight-through estimator
//! 2. **Decoder**: GRU that reduces the embedded symbol sequence to a
//!    Gaussian over the input space, sampled by reparameterisation
//! 3. **ELBO**: reconstruction error plus β-weighted KL against a uniform
//!    prior over the dictionary
//! 4. **Training**: hand-written reverse-mode gradients and Adam
//!
//! ## Shapes
//!
//! - input: `[batch, input_size]`
//! - tokens / relaxed distributions: `[batch, word_length, dictionary_size]`
//! - symbols: `[batch, word_length]`

pub mod config;
pub mod core;
pub mod data;
pub mod model;
pub mod sampling;
pub mod train;

pub use config::{Device, ReconLoss, VaeConfig};
pub use crate::core::mode::ExecutionMode;
pub use model::loss::ElboTerms;
pub use model::vae::{Checkpoint, DiscreteVae, ForwardOutput};
pub use train::inference::{extract_messages, Messages};
pub use train::trainer::{train, EpochStats, TrainConfig};
