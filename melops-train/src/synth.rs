//! Synth subcommand - synthesize a mel-spectrogram from text.

use crate::cli::ConfigArgs;
use eyre::{Context, Result};
use melops_tts::checkpoint::Checkpoint;
use melops_tts::model::RadTtsModel;
use melops_tts::plot::plot_spectrogram;
use ndarray::{Array3, s};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// CLI arguments for synthesis.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Text to synthesize
    pub text: String,

    /// Output path for the mel-spectrogram as JSON
    #[arg(short, long)]
    pub output: PathBuf,

    /// Checkpoint to load parameters from
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Speaker id
    #[arg(long, default_value_t = 0)]
    pub speaker: i64,

    /// Noise scale (default: train.sigma)
    #[arg(long)]
    pub sigma: Option<f32>,

    /// Normalize text before tokenizing
    #[arg(long)]
    pub normalize: bool,

    /// Also render the spectrogram as PNG
    #[arg(long)]
    pub image: Option<PathBuf>,
}

/// Resolved configuration for synthesis.
#[derive(Debug)]
pub struct Config {
    pub experiment: melops_tts::config::Config,
    pub text: String,
    pub output: PathBuf,
    pub checkpoint: Option<PathBuf>,
    pub speaker: i64,
    pub sigma: f32,
    pub normalize: bool,
    pub image: Option<PathBuf>,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let experiment = args.config.load()?;
        let sigma = args.sigma.unwrap_or(experiment.train.sigma);

        Ok(Self {
            experiment,
            text: args.text,
            output: args.output,
            checkpoint: args.checkpoint,
            speaker: args.speaker,
            sigma,
            normalize: args.normalize,
            image: args.image,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let mut model =
        RadTtsModel::from_config(&config.experiment).wrap_err("failed to build model")?;

    if let Some(path) = &config.checkpoint {
        Checkpoint::load(path)
            .and_then(|checkpoint| checkpoint.restore(model.network_mut().parameters_mut()))
            .wrap_err_with(|| format!("failed to load checkpoint: {:?}", path.display()))?;
    }

    model.eval();
    let tokens = model
        .parse(&config.text, config.normalize)
        .wrap_err("failed to tokenize text")?;

    let start = Instant::now();

    let mel = model
        .generate_spectrogram(&tokens, config.speaker, config.sigma)
        .wrap_err("synthesis failed")?;

    tracing::info!(
        tokens = tokens.len(),
        shape = ?mel.dim(),
        duration = %format!("{:.2}s", start.elapsed().as_secs_f32()),
        "spectrogram generated"
    );

    write_mel(&mel, &config.output)?;

    if let Some(path) = &config.image {
        let image = plot_spectrogram(mel.slice(s![0, .., ..]))
            .wrap_err("failed to render spectrogram")?;
        image
            .save(path)
            .wrap_err_with(|| format!("failed to write image: {:?}", path.display()))?;
        tracing::info!(path = ?path.display(), "write image");
    }

    Ok(())
}

fn write_mel(mel: &Array3<f32>, path: &Path) -> Result<()> {
    tracing::info!(path = ?path.display(), "write spectrogram");

    let file = File::create(path)
        .wrap_err_with(|| format!("failed to create output: {:?}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), mel).wrap_err("failed to serialize spectrogram")
}
