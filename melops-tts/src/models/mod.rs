//! Synthesis network implementations.

pub mod aligner;

pub use aligner::AlignerNetwork;

use crate::config::{ModelConfig, NetworkConfig};
use crate::traits::SynthesisNetwork;

/// Instantiate the network selected by `config` for a vocabulary of `n_vocab` tokens.
pub fn build_network(config: &ModelConfig, n_vocab: usize) -> Box<dyn SynthesisNetwork> {
    match config.network {
        NetworkConfig::Aligner {
            temperature,
            init_scale,
            seed,
        } => Box::new(AlignerNetwork::new(
            n_vocab,
            config.n_mel_channels,
            config.n_speakers,
            temperature,
            init_scale,
            seed,
        )),
    }
}
