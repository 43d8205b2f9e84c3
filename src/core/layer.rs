//! Named parameter access shared by initialisation, optimisation and
//! checkpoint inspection.

use ndarray::{ArrayViewD, ArrayViewMutD};

/// Which initialisation rule a layer's tensors follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerRole {
    /// Affine projection.
    Linear,
    /// Recurrent cell whose bias carries a forget-gate partition (LSTM-style).
    RecurrentWithForgetGate,
    /// Recurrent cell without a forget gate (GRU-style).
    RecurrentWithoutForgetGate,
}

/// Weight matrices and bias vectors are initialised differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Weight,
    Bias,
}

/// Mutable handle to one parameter tensor.
pub struct ParamSlot<'a> {
    pub kind: ParamKind,
    pub tensor: ArrayViewMutD<'a, f32>,
}

/// A parameter-bearing layer.
///
/// `slots` and `slots_mut` must list tensors in the same order so that a
/// parameter set and a gradient set of the same type can be zipped.
pub trait Layer {
    fn role(&self) -> LayerRole;

    fn slots(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)>;

    fn slots_mut(&mut self) -> Vec<ParamSlot<'_>>;

    /// Total scalar parameter count.
    fn param_count(&self) -> usize {
        self.slots().iter().map(|(_, t)| t.len()).sum()
    }
}
