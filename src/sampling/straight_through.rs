//! Straight-through discretisation.
//!
//! Forward value is the hard one-hot of the row argmax; the backward pass
//! routes `∂L/∂one_hot` to the relaxed distribution unchanged. Value and
//! gradient are carried separately, so there is no branch on the backward
//! path.

use ndarray::{Array1, Array2, Axis};

/// Hard symbols produced from a batch of relaxed distributions.
#[derive(Clone, Debug)]
pub struct Discretized {
    /// One-hot rows: [batch, vocab]
    pub one_hot: Array2<f32>,

    /// Argmax of each row: [batch]
    pub index: Array1<usize>,
}

/// Index of the largest entry; ties resolve to the lowest index.
pub fn argmax<'a>(row: impl IntoIterator<Item = &'a f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.into_iter().enumerate() {
        if v > best_val {
            best = i;
            best_val = v;
        }
    }
    best
}

/// Replace every row of `distribution` by the one-hot of its argmax.
pub fn straight_through_discretize(distribution: &Array2<f32>) -> Discretized {
    let (batch, vocab) = distribution.dim();
    let mut one_hot = Array2::zeros((batch, vocab));
    let index: Array1<usize> = distribution
        .axis_iter(Axis(0))
        .map(|row| argmax(row.iter()))
        .collect();
    for (b, &k) in index.iter().enumerate() {
        one_hot[[b, k]] = 1.0;
    }
    Discretized { one_hot, index }
}

/// Gradient with respect to the relaxed distribution given the gradient
/// with respect to the one-hot output.
pub fn straight_through_backward(d_one_hot: &Array2<f32>) -> Array2<f32> {
    d_one_hot.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_discretize_is_one_hot() {
        let dist = array![[0.1, 0.7, 0.2], [0.5, 0.3, 0.2], [0.2, 0.2, 0.6]];
        let d = straight_through_discretize(&dist);
        assert_eq!(d.index.to_vec(), vec![1, 0, 2]);
        for (row, &k) in d.one_hot.axis_iter(Axis(0)).zip(d.index.iter()) {
            assert_eq!(row.sum(), 1.0);
            assert_eq!(row[k], 1.0);
        }
    }

    #[test]
    fn test_argmax_tie_takes_first() {
        let row = [0.4_f32, 0.4, 0.2];
        assert_eq!(argmax(row.iter()), 0);
    }

    #[test]
    fn test_backward_is_identity() {
        let g = array![[0.5, -1.0, 2.0]];
        assert_eq!(straight_through_backward(&g), g);
    }
}
