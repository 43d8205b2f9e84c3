//! Differentiable sampling primitives.
//!
//! - **relaxed**: Gumbel-softmax relaxation of a categorical draw
//! - **straight_through**: hard one-hot forward, identity backward
//! - **reparam**: Gaussian reparameterisation for the decoder output

pub mod relaxed;
pub mod reparam;
pub mod straight_through;
