//! Train subcommand - fit a model from a YAML config.

use crate::cli::ConfigArgs;
use eyre::{Context, OptionExt, Result};
use melops_tts::data::DataLoader;
use melops_tts::metrics::{FileSink, TracingSink};
use melops_tts::model::RadTtsModel;
use melops_tts::optim::OptimizerKind;
use melops_tts::trainer::Trainer;
use melops_tts::traits::MetricsSink;
use std::path::PathBuf;
use std::time::Instant;

/// CLI arguments for training.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Override train.max_steps
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Override optim.name (Adam or RAdam)
    #[arg(long)]
    pub optimizer: Option<String>,

    /// Override train.checkpoint_dir
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Override train.finetune_layers (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub finetune_layers: Vec<String>,

    /// Checkpoint to resume from
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Write metrics as JSON lines and PNG images here instead of the log
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// Resolved configuration for training.
#[derive(Debug)]
pub struct Config {
    pub experiment: melops_tts::config::Config,
    pub resume: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let mut experiment = args.config.load()?;

        if let Some(steps) = args.max_steps {
            experiment = experiment.with_max_steps(steps);
        }
        if let Some(name) = args.optimizer {
            experiment = experiment.with_optimizer(name);
        }
        if let Some(dir) = args.checkpoint_dir {
            experiment = experiment.with_checkpoint_dir(dir);
        }
        if !args.finetune_layers.is_empty() {
            experiment = experiment.with_finetune_layers(args.finetune_layers);
        }

        Ok(Self {
            experiment,
            resume: args.resume,
            log_dir: args.log_dir,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let Config {
        experiment,
        resume,
        log_dir,
    } = config;

    // Fail before any data is loaded
    experiment
        .optim
        .name
        .parse::<OptimizerKind>()
        .wrap_err("failed to configure optimizer")?;

    let mut model = RadTtsModel::from_config(&experiment).wrap_err("failed to build model")?;

    let s = Instant::now();

    let train_ds = experiment
        .train_ds
        .as_ref()
        .ok_or_eyre("config has no train_ds section")?;
    let mut train_dl = DataLoader::from_config(
        train_ds,
        model.tokenizer(),
        model.normalizer(),
        experiment.train.seed,
    )
    .wrap_err("failed to load training data")?
    .ok_or_eyre("train_ds.dataset.manifest_filepath is required for training")?;

    let mut val_dl = match &experiment.validation_ds {
        Some(data) => DataLoader::from_config(
            data,
            model.tokenizer(),
            model.normalizer(),
            experiment.train.seed,
        )
        .wrap_err("failed to load validation data")?,
        None => None,
    };

    tracing::info!(
        train = train_dl.dataset().len(),
        validation = val_dl.as_ref().map(|dl| dl.dataset().len()),
        duration = %format_secs(s.elapsed().as_secs_f32()),
        "datasets loaded"
    );

    let mut sink: Box<dyn MetricsSink> = match log_dir {
        Some(dir) => Box::new(
            FileSink::new(&dir)
                .wrap_err_with(|| format!("failed to open log dir: {:?}", dir.display()))?,
        ),
        None => Box::new(TracingSink),
    };

    let mut trainer = Trainer::new(&experiment.train);
    if let Some(path) = resume {
        trainer
            .resume(&mut model, &path)
            .wrap_err_with(|| format!("failed to resume from: {:?}", path.display()))?;
    }

    let s = Instant::now();

    let state = trainer
        .fit(&mut model, &mut train_dl, val_dl.as_mut(), sink.as_mut())
        .wrap_err("training failed")?;

    tracing::info!(
        steps = state.step,
        epochs = state.epoch,
        loss = state.last_loss,
        val_loss = state.last_val_loss,
        duration = %format_secs(s.elapsed().as_secs_f32()),
        "training finished"
    );

    Ok(())
}

/// Format seconds as a string with two decimal places.
fn format_secs(secs: f32) -> String {
    format!("{:.2}s", secs)
}
