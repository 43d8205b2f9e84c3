//! Core layers: linear projections, the GRU cell, the parameter-access trait
//! and the initialisation policy that walks it.

pub mod gru;
pub mod init;
pub mod layer;
pub mod linear;
pub mod mode;
