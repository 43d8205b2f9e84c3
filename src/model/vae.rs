//! The discrete-bottleneck VAE.
//!
//! Wires the encoder, decoder and ELBO together, validates shapes at the
//! public boundary and owns the parameter set. All stochastic calls take an
//! explicit [`ExecutionMode`] and RNG; the model holds no mode flag.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{VaeConfig, CHECKPOINT_VERSION};
use crate::core::mode::ExecutionMode;

use super::decoder::{Decoded, DecoderGrads, DecoderStateMachine, DecoderTrace};
use super::encoder::{Encoded, EncoderGrads, EncoderStateMachine, EncoderTrace};
use super::loss::{self, ElboTerms};
use super::params::{VaeGrads, VaeParams};

/// Everything a forward pass produces.
#[derive(Clone, Debug)]
pub struct ForwardOutput {
    /// [batch, input_size]
    pub reconstruction: Array2<f32>,
    pub mean: Array2<f32>,
    pub logvar: Array2<f32>,

    /// [batch, word_length, dictionary_size]
    pub discrete_tokens: Array3<f32>,
    pub relaxed: Array3<f32>,

    /// [batch, word_length]
    pub symbols: Array2<usize>,

    pub trace: ForwardTrace,
}

/// Activations needed by [`DiscreteVae::backward`].
#[derive(Clone, Debug)]
pub struct ForwardTrace {
    pub mode: ExecutionMode,
    pub encoder: EncoderTrace,
    pub decoder: DecoderTrace,
}

/// Complete parameter snapshot plus the configuration it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub config: VaeConfig,
    pub params: VaeParams,
}

impl Checkpoint {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialise checkpoint")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let checkpoint: Checkpoint =
            bincode::deserialize(bytes).context("failed to deserialise checkpoint")?;
        ensure!(
            checkpoint.version == CHECKPOINT_VERSION,
            "unsupported checkpoint version {} (expected {})",
            checkpoint.version,
            CHECKPOINT_VERSION
        );
        Ok(checkpoint)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write checkpoint '{}'", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read checkpoint '{}'", path.display()))?;
        Self::from_bytes(&bytes)
    }
}

/// Discrete-bottleneck variational autoencoder.
#[derive(Clone, Debug)]
pub struct DiscreteVae {
    config: VaeConfig,
    params: VaeParams,
}

impl DiscreteVae {
    /// Build and initialise a model, seeding from `config.seed`.
    pub fn new(config: VaeConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(config, &mut rng)
    }

    /// Build and initialise a model from a caller-supplied RNG.
    pub fn with_rng<R: Rng + ?Sized>(config: VaeConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let mut params = VaeParams::zeros(config.input_size, config.dictionary_size);
        params.initialize(rng);
        tracing::debug!(
            input_size = config.input_size,
            word_length = config.word_length,
            dictionary_size = config.dictionary_size,
            params = params.param_count(),
            "initialised discrete VAE"
        );
        Ok(Self { config, params })
    }

    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    pub fn params(&self) -> &VaeParams {
        &self.params
    }

    /// Mutable parameters, for optimiser steps.
    pub fn params_mut(&mut self) -> &mut VaeParams {
        &mut self.params
    }

    /// Re-run the initialisation policy with fresh draws.
    pub fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.params.initialize(rng);
    }

    fn encoder(&self) -> EncoderStateMachine<'_> {
        EncoderStateMachine {
            gru: &self.params.encoder_gru,
            hidden_to_token: &self.params.hidden_to_token,
            token_to_hidden: &self.params.token_to_hidden,
            word_length: self.config.word_length,
            temperature: self.config.temperature,
        }
    }

    fn decoder(&self) -> DecoderStateMachine<'_> {
        DecoderStateMachine {
            token_to_hidden: &self.params.token_to_hidden,
            gru: &self.params.decoder_gru,
            output_mean: &self.params.output_mean,
            output_logvar: &self.params.output_logvar,
        }
    }

    fn check_inputs(&self, x: &Array2<f32>) -> Result<()> {
        ensure!(x.nrows() > 0, "batch must not be empty");
        ensure!(
            x.ncols() == self.config.input_size,
            "input has {} features, model expects input_size = {}",
            x.ncols(),
            self.config.input_size
        );
        Ok(())
    }

    fn check_sequence(&self, name: &str, seq: &Array3<f32>, batch: Option<usize>) -> Result<()> {
        let (b, steps, vocab) = seq.dim();
        ensure!(b > 0, "{} batch must not be empty", name);
        ensure!(
            steps == self.config.word_length && vocab == self.config.dictionary_size,
            "{} has shape ({}, {}, {}), expected (batch, {}, {})",
            name,
            b,
            steps,
            vocab,
            self.config.word_length,
            self.config.dictionary_size
        );
        if let Some(expected) = batch {
            ensure!(b == expected, "{} batch {} does not match {}", name, b, expected);
        }
        Ok(())
    }

    /// Encode `x`: [batch, input_size] into a symbol sequence.
    pub fn encode<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        mode: ExecutionMode,
        sampling: bool,
        rng: &mut R,
    ) -> Result<Encoded> {
        self.check_inputs(x)?;
        self.encoder().run(x, mode, sampling, rng)
    }

    /// Decode one-hot `tokens`: [batch, word_length, dictionary_size].
    pub fn decode<R: Rng + ?Sized>(
        &self,
        tokens: &Array3<f32>,
        mode: ExecutionMode,
        rng: &mut R,
    ) -> Result<Decoded> {
        self.check_sequence("tokens", tokens, None)?;
        self.decoder().run(tokens, mode, rng)
    }

    /// Encode with sampling enabled, then decode the hard symbols.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        mode: ExecutionMode,
        rng: &mut R,
    ) -> Result<ForwardOutput> {
        let encoded = self.encode(x, mode, true, rng)?;
        let decoded = self.decoder().run(&encoded.discrete_tokens, mode, rng)?;
        Ok(ForwardOutput {
            reconstruction: decoded.reconstruction,
            mean: decoded.mean,
            logvar: decoded.logvar,
            discrete_tokens: encoded.discrete_tokens,
            relaxed: encoded.relaxed,
            symbols: encoded.symbols,
            trace: ForwardTrace {
                mode,
                encoder: encoded.trace,
                decoder: decoded.trace,
            },
        })
    }

    /// ELBO of a reconstruction against its inputs.
    pub fn elbo(
        &self,
        inputs: &Array2<f32>,
        reconstruction: &Array2<f32>,
        relaxed: &Array3<f32>,
        beta: f32,
    ) -> Result<ElboTerms> {
        self.check_inputs(inputs)?;
        ensure!(
            reconstruction.dim() == inputs.dim(),
            "reconstruction shape {:?} does not match inputs {:?}",
            reconstruction.dim(),
            inputs.dim()
        );
        self.check_sequence("relaxed distributions", relaxed, Some(inputs.nrows()))?;
        Ok(loss::elbo(
            inputs,
            reconstruction,
            relaxed,
            beta,
            self.config.recon_loss,
        ))
    }

    /// ELBO of `output` and its gradient with respect to every parameter.
    pub fn backward(&self, inputs: &Array2<f32>, output: &ForwardOutput, beta: f32) -> Result<(ElboTerms, VaeGrads)> {
        let terms = self.elbo(inputs, &output.reconstruction, &output.relaxed, beta)?;
        let elbo_grad = loss::elbo_grad(
            inputs,
            &output.reconstruction,
            &output.relaxed,
            beta,
            self.config.recon_loss,
        );

        let mut grads = self.params.zeros_like();
        let d_tokens = self.decoder().backward(
            &output.trace.decoder,
            &elbo_grad.d_reconstruction,
            DecoderGrads {
                token_to_hidden: &mut grads.token_to_hidden,
                gru: &mut grads.decoder_gru,
                output_mean: &mut grads.output_mean,
                output_logvar: &mut grads.output_logvar,
            },
        )?;
        self.encoder().backward(
            &output.trace.encoder,
            &d_tokens,
            &elbo_grad.d_relaxed,
            EncoderGrads {
                gru: &mut grads.encoder_gru,
                hidden_to_token: &mut grads.hidden_to_token,
                token_to_hidden: &mut grads.token_to_hidden,
            },
        );
        Ok((terms, grads))
    }

    /// Snapshot of the configuration and every parameter tensor.
    pub fn snapshot(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            config: self.config.clone(),
            params: self.params.clone(),
        }
    }

    /// Load parameters from a checkpoint taken from a model of identical
    /// sizing parameters.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        ensure!(
            self.config.same_shape(&checkpoint.config),
            "checkpoint shape (input {}, length {}, vocab {}) does not match model (input {}, length {}, vocab {})",
            checkpoint.config.input_size,
            checkpoint.config.word_length,
            checkpoint.config.dictionary_size,
            self.config.input_size,
            self.config.word_length,
            self.config.dictionary_size
        );
        for ((name, ours), (_, theirs)) in self
            .params
            .named_tensors()
            .into_iter()
            .zip(checkpoint.params.named_tensors())
        {
            ensure!(
                ours.shape() == theirs.shape(),
                "checkpoint tensor {} has shape {:?}, model expects {:?}",
                name,
                theirs.shape(),
                ours.shape()
            );
        }
        self.params = checkpoint.params.clone();
        Ok(())
    }

    /// Rebuild a model directly from a checkpoint.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self> {
        checkpoint.config.validate()?;
        let mut model = Self::new(checkpoint.config.clone())?;
        model.restore(&checkpoint)?;
        Ok(model)
    }
}
