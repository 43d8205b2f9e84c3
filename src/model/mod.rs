//! Discrete-bottleneck VAE: encoder and decoder state machines, the ELBO and
//! the model that ties them together.

pub mod decoder;
pub mod encoder;
pub mod loss;
pub mod params;
pub mod recurrence;
pub mod vae;
