//! mel-train CLI - RAD-TTS training and synthesis

use clap::Parser;
use eyre::Result;
use melops_train::cli::{Cli, is_fatal_config_error, run_cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run_cli(Cli::parse()) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if is_fatal_config_error(&e) => {
            tracing::error!("{e:#}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
