//! Experiment configuration.
//!
//! A single YAML document describes the model, training schedule, optimizer,
//! datasets and text frontend:
//!
//! ```yaml
//! model:
//!   n_mel_channels: 80
//!   n_speakers: 1
//!   network: { type: aligner, temperature: 0.0005 }
//! train:
//!   binarization_start_iter: 6000
//!   kl_loss_start_iter: 18000
//! optim: { name: RAdam, lr: 0.0001 }
//! train_ds:
//!   dataset: { manifest_filepath: train.jsonl }
//!   dataloader_params: { batch_size: 16, shuffle: true }
//! text_tokenizer: { type: chars, symbols: "abcdefghijklmnopqrstuvwxyz" }
//! ```

use crate::error::{ConfigError, Result};
use crate::loss::LossWeights;
use crate::phase::PhaseGate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level experiment configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub optim: OptimConfig,
    #[serde(default)]
    pub train_ds: Option<DataConfig>,
    #[serde(default)]
    pub validation_ds: Option<DataConfig>,
    #[serde(default)]
    pub text_tokenizer: TokenizerConfig,
    #[serde(default)]
    pub text_normalizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub text_normalizer_call_kwargs: NormalizerCallKwargs,
}

impl Config {
    /// Load config from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Save config to a YAML file.
    pub fn to_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set the optimizer name.
    pub fn with_optimizer(mut self, name: impl Into<String>) -> Self {
        self.optim.name = name.into();
        self
    }

    /// Set max training steps.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.train.max_steps = steps;
        self
    }

    /// Set checkpoint directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.train.checkpoint_dir = dir.into();
        self
    }

    /// Set fine-tuned layer substrings.
    pub fn with_finetune_layers(mut self, layers: Vec<String>) -> Self {
        self.train.finetune_layers = layers;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.train.seed = seed;
        self
    }

    /// Validate configuration.
    ///
    /// The optimizer name is not checked here; an unknown name is reported
    /// when the optimizer is configured.
    pub fn validate(&self) -> Result<()> {
        if self.model.n_mel_channels == 0 {
            return Err(invalid("model.n_mel_channels", "must be at least 1"));
        }
        if self.model.n_speakers == 0 {
            return Err(invalid("model.n_speakers", "must be at least 1"));
        }
        if self.optim.lr <= 0.0 {
            return Err(invalid("optim.lr", "must be positive"));
        }
        let (beta1, beta2) = self.optim.betas;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(invalid("optim.betas", "must be in [0, 1)"));
        }
        if self.train.sigma < 0.0 {
            return Err(invalid("train.sigma", "must be non-negative"));
        }
        if self.train.val_every_n_steps == 0 {
            return Err(invalid("train.val_every_n_steps", "must be at least 1"));
        }
        for ds in [&self.train_ds, &self.validation_ds].into_iter().flatten() {
            ds.validate(self.model.n_mel_channels)?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> crate::error::Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
    .into()
}

/// Model architecture configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub n_mel_channels: usize,
    #[serde(default = "one")]
    pub n_speakers: usize,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: 80,
            n_speakers: 1,
            network: NetworkConfig::default(),
        }
    }
}

/// Synthesis network selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkConfig {
    /// Embedding aligner with attention prior and monotonic alignment search.
    Aligner {
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_init_scale")]
        init_scale: f32,
        #[serde(default)]
        seed: u64,
    },
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::Aligner {
            temperature: default_temperature(),
            init_scale: default_init_scale(),
            seed: 0,
        }
    }
}

fn default_temperature() -> f32 {
    0.0005
}

fn default_init_scale() -> f32 {
    0.1
}

fn one() -> usize {
    1
}

/// Training schedule and loss configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Default inference noise scale
    pub sigma: f32,
    pub binarization_start_iter: i64,
    pub kl_loss_start_iter: i64,
    /// Substrings selecting trainable parameters; empty trains everything
    pub finetune_layers: Vec<String>,
    pub loss_weights: LossWeights,
    pub max_steps: u64,
    pub val_every_n_steps: u64,
    pub log_every_n_steps: u64,
    /// Gradient clipping max norm (0 disables)
    pub max_grad_norm: f32,
    pub checkpoint_dir: PathBuf,
    /// Keep only last N checkpoints (0 = keep all)
    pub keep_last_n_checkpoints: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let phase = PhaseGate::default();
        Self {
            sigma: 1.0,
            binarization_start_iter: phase.binarization_start_iter,
            kl_loss_start_iter: phase.kl_loss_start_iter,
            finetune_layers: Vec::new(),
            loss_weights: LossWeights::default(),
            max_steps: 100_000,
            val_every_n_steps: 1000,
            log_every_n_steps: 100,
            max_grad_norm: 1.0,
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last_n_checkpoints: 5,
            seed: 42,
        }
    }
}

impl TrainConfig {
    pub fn phase_gate(&self) -> PhaseGate {
        PhaseGate::new(self.binarization_start_iter, self.kl_loss_start_iter)
    }
}

/// Optimizer configuration. `name` is resolved by
/// [`configure_optimizer`](crate::optim::configure_optimizer).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub name: String,
    pub lr: f32,
    pub weight_decay: f32,
    pub betas: (f32, f32),
    pub eps: f32,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            name: "RAdam".to_string(),
            lr: 1e-4,
            weight_decay: 1e-6,
            betas: (0.9, 0.98),
            eps: 1e-8,
        }
    }
}

/// Dataset and dataloader configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub dataloader_params: DataloaderParams,
}

impl DataConfig {
    fn validate(&self, n_mel_channels: usize) -> Result<()> {
        let ds = &self.dataset;
        if ds.n_mels != n_mel_channels {
            return Err(invalid(
                "dataset.n_mels",
                &format!("{} does not match model.n_mel_channels {n_mel_channels}", ds.n_mels),
            ));
        }
        if ds.win_length > ds.n_fft {
            return Err(invalid("dataset.win_length", "must not exceed n_fft"));
        }
        if ds.hop_length == 0 {
            return Err(invalid("dataset.hop_length", "must be at least 1"));
        }
        if self.dataloader_params.batch_size == 0 {
            return Err(invalid("dataloader_params.batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Manifest location and feature extraction parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub manifest_filepath: Option<PathBuf>,
    pub sample_rate: u32,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: Option<f32>,
    pub pitch_fmin: f32,
    pub pitch_fmax: f32,
    pub min_duration: Option<f32>,
    pub max_duration: Option<f32>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            manifest_filepath: None,
            sample_rate: 22050,
            n_fft: 1024,
            win_length: 1024,
            hop_length: 256,
            n_mels: 80,
            f_min: 0.0,
            f_max: Some(8000.0),
            pitch_fmin: 65.0,
            pitch_fmax: 2093.0,
            min_duration: None,
            max_duration: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataloaderParams {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
}

impl Default for DataloaderParams {
    fn default() -> Self {
        Self {
            batch_size: 16,
            shuffle: false,
            drop_last: false,
        }
    }
}

/// Where a HuggingFace tokenizer is loaded from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Local directory if it exists, otherwise the hub API
    #[default]
    Auto,
    Path,
    Cache,
    Api,
}

/// Text tokenizer selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenizerConfig {
    /// Character tokenizer. Id 0 is padding, id 1 is out-of-vocabulary,
    /// followed by space, `symbols` and `punct`.
    Chars {
        symbols: String,
        #[serde(default = "default_punct")]
        punct: String,
    },
    /// `tokenizer.json` from a local directory or the HuggingFace hub.
    #[serde(rename = "huggingface")]
    HuggingFace {
        model_id: String,
        #[serde(default)]
        model_source: ModelSource,
        #[serde(default)]
        pad_id: i64,
    },
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self::Chars {
            symbols: "abcdefghijklmnopqrstuvwxyz".to_string(),
            punct: default_punct(),
        }
    }
}

fn default_punct() -> String {
    ".,!?;:'-\"".to_string()
}

/// Text normalizer selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizerConfig {
    /// Whitespace collapsing plus `written<TAB>spoken` whitelist replacement.
    Basic {
        #[serde(default)]
        whitelist: Option<PathBuf>,
    },
}

/// Arguments applied on every normalizer call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerCallKwargs {
    pub lowercase: bool,
    pub verbose: bool,
}

impl Default for NormalizerCallKwargs {
    fn default() -> Self {
        Self {
            lowercase: true,
            verbose: false,
        }
    }
}
