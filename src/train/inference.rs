//! Message extraction.
//!
//! Runs the model in evaluation mode over a dataset and collects every
//! reconstruction together with the symbol sequence that produced it.
//! With [`Device::Threaded`] the mini-batches are spread across rayon
//! workers; rows are independent so the result is identical to the
//! sequential path.

use anyhow::{ensure, Result};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::Device;
use crate::core::mode::ExecutionMode;
use crate::data::{batch_indices, gather};
use crate::model::vae::DiscreteVae;

/// Reconstructions and symbol sequences, one row per example, in dataset order.
#[derive(Clone, Debug, PartialEq)]
pub struct Messages {
    /// [examples, input_size]
    pub reconstructions: Array2<f32>,
    /// [examples, word_length]
    pub symbols: Array2<usize>,
}

fn run_batch(model: &DiscreteVae, data: &Array2<f32>, indices: &[usize], seed: u64) -> Result<(Array2<f32>, Array2<usize>)> {
    let batch = gather(data, indices);
    let mut rng = StdRng::seed_from_u64(seed);
    let output = model.forward(&batch, ExecutionMode::Evaluation, &mut rng)?;
    Ok((output.reconstruction, output.symbols))
}

/// Encode and reconstruct every row of `data`.
pub fn extract_messages(model: &DiscreteVae, data: &Array2<f32>, batch_size: usize) -> Result<Messages> {
    ensure!(batch_size > 0, "batch_size must be > 0");
    ensure!(data.nrows() > 0, "dataset is empty");

    let batches = batch_indices::<StdRng>(data.nrows(), batch_size, None);
    let seed = model.config().seed;
    let device = model.config().device;
    tracing::debug!(batches = batches.len(), ?device, "extracting messages");

    let results: Vec<(Array2<f32>, Array2<usize>)> = match device {
        Device::Cpu => batches
            .iter()
            .enumerate()
            .map(|(i, idx)| run_batch(model, data, idx, seed.wrapping_add(i as u64)))
            .collect::<Result<_>>()?,
        Device::Threaded => batches
            .par_iter()
            .enumerate()
            .map(|(i, idx)| run_batch(model, data, idx, seed.wrapping_add(i as u64)))
            .collect::<Result<_>>()?,
    };

    let recon_views: Vec<ArrayView2<'_, f32>> = results.iter().map(|(r, _)| r.view()).collect();
    let symbol_views: Vec<ArrayView2<'_, usize>> = results.iter().map(|(_, s)| s.view()).collect();
    Ok(Messages {
        reconstructions: concatenate(Axis(0), &recon_views)?,
        symbols: concatenate(Axis(0), &symbol_views)?,
    })
}
