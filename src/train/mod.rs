//! Training and inference drivers.
//!
//! - **adam**: first-order optimiser over the full parameter set
//! - **trainer**: epoch loop with per-epoch ELBO reporting and checkpointing
//! - **inference**: evaluation-mode message extraction

pub mod adam;
pub mod inference;
pub mod trainer;
