//! melops-tts: RAD-TTS style training and inference wrapper.
//!
//! This crate wires a text frontend, a synthesis network, a composite loss
//! and an optimizer into the hooks of a step-driven training loop, plus a
//! mel-spectrogram inference entry point.
//!
//! # Architecture
//!
//! The wrapper only talks to its collaborators through narrow traits:
//!
//! - [`traits::SynthesisNetwork`]: Teacher-forced forward, free-running inference and gradients
//! - [`traits::LossModule`]: Maps network outputs to named, weighted loss terms
//! - [`traits::MetricsSink`]: Receives scalars and alignment images
//! - [`traits::TextTokenizer`] / [`traits::TextNormalizer`]: Text to token ids
//!
//! [`model::RadTtsModel`] owns one of each and is driven by
//! [`trainer::Trainer`]. [`models::AlignerNetwork`] is a compact reference
//! network with analytic gradients.
//!
//! # Quick Start
//!
//! ```ignore
//! use melops_tts::config::Config;
//! use melops_tts::model::RadTtsModel;
//!
//! // Build tokenizer, network and loss from YAML
//! let config = Config::from_yaml("radtts.yaml")?;
//! let mut model = RadTtsModel::from_config(&config)?;
//!
//! // Synthesize
//! model.eval();
//! let tokens = model.parse("hello world", true)?;
//! let mel = model.generate_spectrogram(&tokens, 0, 1.0)?;
//! println!("{:?}", mel.dim());
//! ```

pub mod audio;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod models;
pub mod optim;
pub mod params;
pub mod phase;
pub mod plot;
pub mod text;
pub mod trainer;
pub mod traits;
pub mod types;
