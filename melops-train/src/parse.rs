//! Parse subcommand - print token ids of a text.

use crate::cli::ConfigArgs;
use eyre::{Context, Result};
use melops_tts::model::RadTtsModel;

/// CLI arguments for tokenization.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Text to tokenize
    pub text: String,

    /// Normalize text before tokenizing
    #[arg(long)]
    pub normalize: bool,
}

/// Resolved configuration for tokenization.
#[derive(Debug)]
pub struct Config {
    pub experiment: melops_tts::config::Config,
    pub text: String,
    pub normalize: bool,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            experiment: args.config.load()?,
            text: args.text,
            normalize: args.normalize,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let ids = token_ids(&config)?;
    println!("{}", serde_json::to_string(&ids)?);
    Ok(())
}

/// Token ids of `config.text` using the configured text frontend.
pub fn token_ids(config: &Config) -> Result<Vec<i64>> {
    let mut model =
        RadTtsModel::from_config(&config.experiment).wrap_err("failed to build model")?;
    model.eval();

    let tokens = model
        .parse(&config.text, config.normalize)
        .wrap_err("failed to tokenize text")?;
    tracing::debug!(text = %config.text, tokens = tokens.len(), "parsed");

    Ok(tokens.iter().copied().collect())
}
