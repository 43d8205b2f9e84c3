//! langcoder: discrete-bottleneck VAE
//!
//! Learns a short symbolic code for numeric vectors and prints the messages
//! a trained model assigns to a dataset.
//!
//! This is the CLI binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use langcoder::config::{DEFAULT_BETA, DEFAULT_SEED, DEFAULT_TEMPERATURE};
use langcoder::data::{load_matrix, write_matrix};
use langcoder::{extract_messages, train, Checkpoint, Device, DiscreteVae, ReconLoss, TrainConfig, VaeConfig};

/// langcoder CLI.
#[derive(Parser, Debug)]
#[command(
    name = "langcoder",
    about = "Discrete-bottleneck VAE: train and extract symbolic messages",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on a numeric dataset and save a checkpoint.
    Train {
        /// Dataset: one example per line, comma or whitespace separated.
        #[arg(short, long)]
        data: PathBuf,

        /// Symbols per message.
        #[arg(short = 'l', long, default_value_t = 4)]
        word_length: usize,

        /// Dictionary size.
        #[arg(short = 'v', long, default_value_t = 8)]
        dictionary_size: usize,

        /// Gumbel-softmax temperature.
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,

        #[arg(short, long, default_value_t = 100)]
        epochs: usize,

        /// Adam learning rate.
        #[arg(long, default_value_t = 1e-3)]
        lr: f32,

        /// KL weight.
        #[arg(long, default_value_t = DEFAULT_BETA)]
        beta: f32,

        #[arg(short, long, default_value_t = 32)]
        batch_size: usize,

        /// Reconstruction loss: mse or bce.
        #[arg(long, default_value = "mse")]
        recon_loss: ReconLoss,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Checkpoint output path.
        #[arg(short, long, default_value = "vae.bin")]
        out: PathBuf,
    },

    /// Print the symbol sequence a trained model assigns to each example,
    /// optionally saving the reconstructions.
    Messages {
        /// Checkpoint written by `train`.
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long, default_value_t = 256)]
        batch_size: usize,

        /// cpu or threaded.
        #[arg(long, default_value = "cpu")]
        device: Device,

        /// Also write each example's reconstruction, one row per line.
        #[arg(long)]
        latent: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    tracing::info!("langcoder v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Train {
            data,
            word_length,
            dictionary_size,
            temperature,
            epochs,
            lr,
            beta,
            batch_size,
            recon_loss,
            seed,
            out,
        } => {
            let dataset = load_matrix(&data)?;
            tracing::info!("Dataset: {} examples x {} features", dataset.nrows(), dataset.ncols());

            let config = VaeConfig::new(dataset.ncols(), word_length, dictionary_size)
                .with_temperature(temperature)
                .with_recon_loss(recon_loss)
                .with_seed(seed);
            let mut model = DiscreteVae::new(config)?;
            let history = train(
                &mut model,
                &dataset,
                &TrainConfig {
                    epochs,
                    learning_rate: lr,
                    beta,
                    batch_size,
                    seed,
                    checkpoint: Some(out),
                },
            )?;
            if let Some(last) = history.last() {
                tracing::info!(
                    "Final: loss {:.4}, recon {:.4}, KLD {:.4}",
                    last.avg_loss,
                    last.avg_recon,
                    last.avg_kl
                );
            }
        }
        Command::Messages {
            model,
            data,
            batch_size,
            device,
            latent,
        } => {
            let mut checkpoint = Checkpoint::load(&model)?;
            checkpoint.config.device = device;
            let vae = DiscreteVae::from_checkpoint(checkpoint)?;
            let dataset = load_matrix(&data)?;
            let messages = extract_messages(&vae, &dataset, batch_size)?;

            for row in messages.symbols.rows() {
                let line: Vec<String> = row.iter().map(|k| k.to_string()).collect();
                println!("{}", line.join(" "));
            }
            tracing::info!("Extracted {} messages", messages.symbols.nrows());

            if let Some(path) = latent {
                write_matrix(&path, &messages.reconstructions)?;
                tracing::info!("Reconstructions written to {}", path.display());
            }
        }
    }

    Ok(())
}
