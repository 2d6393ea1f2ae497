//! Step-driven training loop.

use crate::checkpoint::{Checkpoint, checkpoint_path, cleanup_old_checkpoints};
use crate::config::TrainConfig;
use crate::data::DataLoader;
use crate::error::{ConfigError, OutputError, Result};
use crate::model::{RadTtsModel, ValidationOutput};
use crate::optim::Optimizer;
use crate::traits::MetricsSink;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Progress of a [`Trainer`].
#[derive(Clone, Copy, Debug)]
pub struct TrainingState {
    /// Optimizer steps taken
    pub step: u64,
    pub epoch: u64,
    /// Total of the last training step
    pub last_loss: f32,
    /// Mean validation total of the last validation run
    pub last_val_loss: Option<f32>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            step: 0,
            epoch: 0,
            last_loss: f32::NAN,
            last_val_loss: None,
        }
    }
}

/// Drives [`RadTtsModel`] hooks over data loaders.
pub struct Trainer {
    max_steps: u64,
    val_every_n_steps: u64,
    log_every_n_steps: u64,
    max_grad_norm: f32,
    checkpoint_dir: Option<PathBuf>,
    keep_last_n_checkpoints: usize,
    state: TrainingState,
}

impl Trainer {
    pub fn new(config: &TrainConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            val_every_n_steps: config.val_every_n_steps.max(1),
            log_every_n_steps: config.log_every_n_steps.max(1),
            max_grad_norm: config.max_grad_norm,
            checkpoint_dir: Some(config.checkpoint_dir.clone()),
            keep_last_n_checkpoints: config.keep_last_n_checkpoints,
            state: TrainingState::default(),
        }
    }

    /// Disable checkpoint writing.
    pub fn without_checkpoints(mut self) -> Self {
        self.checkpoint_dir = None;
        self
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Load parameters from `path` and continue counting from its step.
    pub fn resume(&mut self, model: &mut RadTtsModel, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::load(path)?;
        checkpoint.restore(model.network_mut().parameters_mut())?;
        self.state.step = checkpoint.step;
        model.set_global_step(checkpoint.step);
        Ok(())
    }

    /// Train until `max_steps`, validating and checkpointing every
    /// `val_every_n_steps`. A final checkpoint is written at the end.
    pub fn fit(
        &mut self,
        model: &mut RadTtsModel,
        train_dl: &mut DataLoader,
        mut val_dl: Option<&mut DataLoader>,
        sink: &mut dyn MetricsSink,
    ) -> Result<TrainingState> {
        if train_dl.num_batches() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "train_ds",
                reason: "dataset yields no batches".to_string(),
            }
            .into());
        }
        if let Some(dir) = &self.checkpoint_dir {
            std::fs::create_dir_all(dir).map_err(OutputError::Io)?;
        }

        let mut optimizer = model.configure_optimizers()?;

        tracing::info!(
            samples = train_dl.dataset().len(),
            batches = train_dl.num_batches(),
            max_steps = self.max_steps,
            lr = optimizer.lr(),
            "starting training"
        );

        let start = Instant::now();
        let mut running_loss = 0.0;
        let mut loss_count = 0;

        while self.state.step < self.max_steps {
            self.state.epoch += 1;
            tracing::debug!(epoch = self.state.epoch, "epoch start");

            for batch in train_dl.epoch() {
                let loss = self.train_step(model, optimizer.as_mut(), batch?, sink)?;
                running_loss += loss;
                loss_count += 1;

                let step = self.state.step;
                if step % self.log_every_n_steps == 0 {
                    let avg_loss = running_loss / loss_count as f32;
                    sink.log_scalar("train/loss", avg_loss, step)?;
                    sink.log_scalar("train/lr", optimizer.lr(), step)?;
                    tracing::info!(
                        step,
                        max_steps = self.max_steps,
                        loss = avg_loss,
                        lr = optimizer.lr(),
                        elapsed = format!("{:.1}s", start.elapsed().as_secs_f32()),
                        "training"
                    );
                    running_loss = 0.0;
                    loss_count = 0;
                }

                if step % self.val_every_n_steps == 0 {
                    if let Some(val_dl) = val_dl.as_deref_mut() {
                        self.validate(model, val_dl, sink)?;
                    }
                    self.save_checkpoint(model)?;
                }

                if self.state.step >= self.max_steps {
                    break;
                }
            }
        }

        self.save_checkpoint(model)?;
        tracing::info!(
            steps = self.state.step,
            elapsed = format!("{:.1}s", start.elapsed().as_secs_f32()),
            "training complete"
        );

        Ok(self.state)
    }

    fn train_step(
        &mut self,
        model: &mut RadTtsModel,
        optimizer: &mut dyn Optimizer,
        batch: Vec<crate::types::Tensor>,
        sink: &mut dyn MetricsSink,
    ) -> Result<f32> {
        model.train();
        model.set_global_step(self.state.step);
        optimizer.zero_grad(model.network_mut().parameters_mut());

        let loss = model.training_step(batch, sink)?;
        model.backward(&loss)?;

        let params = model.network_mut().parameters_mut();
        let grad_norm = params.clip_grad_norm(self.max_grad_norm);
        optimizer.step(params);
        sink.log_scalar("train/grad_norm", grad_norm, self.state.step)?;

        self.state.step += 1;
        self.state.last_loss = loss.total;
        Ok(loss.total)
    }

    /// Run one validation pass and log it through the model's epoch hook.
    pub fn validate(
        &mut self,
        model: &mut RadTtsModel,
        val_dl: &mut DataLoader,
        sink: &mut dyn MetricsSink,
    ) -> Result<Vec<ValidationOutput>> {
        let was_training = model.is_training();
        model.eval();
        model.set_global_step(self.state.step);

        let mut outputs = Vec::with_capacity(val_dl.num_batches());
        for (batch_idx, batch) in val_dl.epoch().enumerate() {
            outputs.push(model.validation_step(batch?, batch_idx)?);
        }

        if !outputs.is_empty() {
            let mean = outputs.iter().map(|o| o.total).sum::<f32>() / outputs.len() as f32;
            self.state.last_val_loss = Some(mean);
            tracing::info!(step = self.state.step, batches = outputs.len(), loss = mean, "validation");
        }
        model.validation_epoch_end(&outputs, sink)?;

        if was_training {
            model.train();
        }
        Ok(outputs)
    }

    fn save_checkpoint(&self, model: &RadTtsModel) -> Result<()> {
        let Some(dir) = &self.checkpoint_dir else {
            return Ok(());
        };
        Checkpoint::new(self.state.step, model.network().parameters())
            .save(checkpoint_path(dir, self.state.step))?;
        cleanup_old_checkpoints(dir, self.keep_last_n_checkpoints)?;
        Ok(())
    }
}
