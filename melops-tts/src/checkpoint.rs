//! JSON checkpoints of network parameters.

use crate::error::{OutputError, Result};
use crate::params::ParameterStore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const PREFIX: &str = "checkpoint-";
const EXTENSION: &str = "json";

/// Parameter values at a global step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u64,
    pub params: ParameterStore,
}

impl Checkpoint {
    pub fn new(step: u64, params: &ParameterStore) -> Self {
        Self {
            step,
            params: params.clone(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(OutputError::Io)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        tracing::info!(path = %path.display(), step = self.step, "saved checkpoint");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(OutputError::Io)?;
        let checkpoint: Self = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(path = %path.display(), step = checkpoint.step, "loaded checkpoint");
        Ok(checkpoint)
    }

    /// Copy the stored values into `params` by name.
    pub fn restore(&self, params: &mut ParameterStore) -> Result<()> {
        params.load_values(&self.params)
    }
}

/// File name of the checkpoint for `step` inside `dir`.
pub fn checkpoint_path(dir: impl AsRef<Path>, step: u64) -> PathBuf {
    dir.as_ref().join(format!("{PREFIX}{step:08}.{EXTENSION}"))
}

fn step_of(path: &Path) -> Option<u64> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(PREFIX)?
        .parse()
        .ok()
}

/// Step-numbered checkpoints in `dir`, oldest first.
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Result<Vec<(u64, PathBuf)>> {
    let mut found = std::fs::read_dir(dir)
        .map_err(OutputError::Io)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            step_of(&path).map(|step| (step, path))
        })
        .collect::<Vec<_>>();
    found.sort_by_key(|(step, _)| *step);
    Ok(found)
}

/// Most recent checkpoint in `dir`, if any.
pub fn latest_checkpoint(dir: impl AsRef<Path>) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(None);
    }
    Ok(list_checkpoints(dir)?.pop().map(|(_, path)| path))
}

/// Remove all but the `keep` most recent checkpoints. `keep == 0` keeps all.
///
/// Returns the number of files removed.
pub fn cleanup_old_checkpoints(dir: impl AsRef<Path>, keep: usize) -> Result<usize> {
    if keep == 0 {
        return Ok(0);
    }

    let found = list_checkpoints(dir)?;
    let stale = found.len().saturating_sub(keep);
    for (step, path) in &found[..stale] {
        std::fs::remove_file(path).map_err(OutputError::Io)?;
        tracing::debug!(step, path = %path.display(), "removed old checkpoint");
    }
    Ok(stale)
}
