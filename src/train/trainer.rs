//! Epoch loop.
//!
//! Each epoch shuffles the dataset, walks it in mini-batches and applies one
//! Adam step per batch. Reported averages are the per-batch losses summed
//! over the epoch and divided by the number of examples.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{DEFAULT_BETA, DEFAULT_SEED};
use crate::core::mode::ExecutionMode;
use crate::data::{batch_indices, gather};
use crate::model::vae::DiscreteVae;

use super::adam::{Adam, AdamConfig};

/// Training-loop settings.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// KL weight.
    pub beta: f32,
    pub batch_size: usize,
    /// Seeds shuffling and every stochastic draw during training.
    pub seed: u64,
    /// Where to write the final checkpoint, if anywhere.
    pub checkpoint: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 1e-3,
            beta: DEFAULT_BETA,
            batch_size: 32,
            seed: DEFAULT_SEED,
            checkpoint: None,
        }
    }
}

/// Averages reported at the end of an epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub avg_loss: f32,
    pub avg_recon: f32,
    pub avg_kl: f32,
}

/// Train `model` on the rows of `data`.
pub fn train(model: &mut DiscreteVae, data: &Array2<f32>, config: &TrainConfig) -> Result<Vec<EpochStats>> {
    ensure!(config.batch_size > 0, "batch_size must be > 0");
    ensure!(
        config.learning_rate.is_finite() && config.learning_rate > 0.0,
        "learning_rate must be finite and > 0, got {}",
        config.learning_rate
    );
    ensure!(data.nrows() > 0, "dataset is empty");

    let dataset_size = data.nrows() as f32;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut optimizer = Adam::new(
        AdamConfig {
            learning_rate: config.learning_rate,
            ..Default::default()
        },
        model.params(),
    );

    tracing::info!(
        examples = data.nrows(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        beta = config.beta,
        "starting training"
    );

    let mut history = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let (mut loss_sum, mut recon_sum, mut kl_sum) = (0.0_f32, 0.0_f32, 0.0_f32);

        for (batch_idx, indices) in batch_indices(data.nrows(), config.batch_size, Some(&mut rng))
            .into_iter()
            .enumerate()
        {
            let batch = gather(data, &indices);
            let output = model.forward(&batch, ExecutionMode::Training, &mut rng)?;
            let (terms, grads) = model.backward(&batch, &output, config.beta)?;

            if !terms.total.is_finite() {
                tracing::warn!(
                    epoch,
                    batch = batch_idx,
                    loss = terms.total,
                    "non-finite loss"
                );
            }
            optimizer.step(model.params_mut(), &grads);

            tracing::debug!(
                epoch,
                batch = batch_idx,
                loss = terms.total,
                recon = terms.reconstruction,
                kl = terms.kl,
                grad_norm = grads.global_norm(),
                "batch"
            );
            loss_sum += terms.total;
            recon_sum += terms.reconstruction;
            kl_sum += terms.kl;
        }

        let stats = EpochStats {
            epoch,
            avg_loss: loss_sum / dataset_size,
            avg_recon: recon_sum / dataset_size,
            avg_kl: kl_sum / dataset_size,
        };
        tracing::info!(
            "Epoch: {}, Avg Loss: {:.4}, Recon: {:.4}, KLD: {:.4}",
            stats.epoch,
            stats.avg_loss,
            stats.avg_recon,
            stats.avg_kl
        );
        history.push(stats);
    }

    if let Some(path) = &config.checkpoint {
        model.snapshot().save(path)?;
        tracing::info!("saved checkpoint to {}", path.display());
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaeConfig;
    use crate::model::vae::Checkpoint;

    fn dataset() -> Array2<f32> {
        Array2::from_shape_fn((10, 4), |(i, j)| ((i * 3 + j) as f32 * 0.21).cos())
    }

    fn model() -> DiscreteVae {
        DiscreteVae::new(VaeConfig::new(4, 2, 3).with_seed(5)).unwrap()
    }

    #[test]
    fn test_history_has_one_entry_per_epoch() {
        let mut vae = model();
        let config = TrainConfig {
            epochs: 3,
            batch_size: 4,
            ..Default::default()
        };
        let history = train(&mut vae, &dataset(), &config).unwrap();
        assert_eq!(history.len(), 3);
        for (i, stats) in history.iter().enumerate() {
            assert_eq!(stats.epoch, i);
            assert!(stats.avg_loss.is_finite());
            assert!((stats.avg_loss - (stats.avg_recon + stats.avg_kl)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_training_updates_parameters() {
        let mut vae = model();
        let before = vae.params().clone();
        let config = TrainConfig {
            epochs: 1,
            batch_size: 3,
            ..Default::default()
        };
        train(&mut vae, &dataset(), &config).unwrap();
        assert_ne!(&before, vae.params());
        assert!(vae.params().all_finite());
    }

    #[test]
    fn test_same_seed_same_result() {
        let config = TrainConfig {
            epochs: 2,
            batch_size: 4,
            seed: 11,
            ..Default::default()
        };
        let mut a = model();
        let mut b = model();
        let ha = train(&mut a, &dataset(), &config).unwrap();
        let hb = train(&mut b, &dataset(), &config).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trained.bin");
        let mut vae = model();
        let config = TrainConfig {
            epochs: 1,
            batch_size: 5,
            checkpoint: Some(path.clone()),
            ..Default::default()
        };
        train(&mut vae, &dataset(), &config).unwrap();
        let restored = DiscreteVae::from_checkpoint(Checkpoint::load(&path).unwrap()).unwrap();
        assert_eq!(restored.params(), vae.params());
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut vae = model();
        let zero_batch = TrainConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(train(&mut vae, &dataset(), &zero_batch).is_err());

        let wrong_width = Array2::zeros((4, 7));
        let config = TrainConfig {
            epochs: 1,
            ..Default::default()
        };
        assert!(train(&mut vae, &wrong_width, &config).is_err());
    }
}
