//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use melops_tts::config::Config;
use melops_tts::error::{ConfigError, Error};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mel-train")]
#[command(about = "RAD-TTS training and mel-spectrogram synthesis")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Train a model from a YAML config
    Train(crate::train::Args),

    /// Synthesize a mel-spectrogram from text
    Synth(crate::synth::Args),

    /// Print the token ids of a text
    Parse(crate::parse::Args),
}

/// Experiment config location, shared by all subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the YAML experiment config
    #[arg(short, long)]
    pub config: PathBuf,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Config> {
        Config::from_yaml(&self.config)
            .wrap_err_with(|| format!("failed to load config: {:?}", self.config.display()))
    }
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Train(args) => crate::train::execute(args.try_into()?),
        Commands::Synth(args) => crate::synth::execute(args.try_into()?),
        Commands::Parse(args) => crate::parse::execute(args.try_into()?),
    }
}

/// Whether `err` is a configuration error that ends the process with status 1.
pub fn is_fatal_config_error(err: &eyre::Report) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<Error>(),
            Some(Error::Config(ConfigError::UnsupportedOptimizer(_)))
        )
    })
}
