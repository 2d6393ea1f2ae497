//! Gradient-based optimizers and optimizer selection.
//!
//! Optimizers update a [`ParameterStore`] in place from the gradients the
//! synthesis network accumulated during `backward`. Frozen parameters and
//! parameters without a gradient are skipped.
//!
//! # References
//!
//! - Kingma, D. P., & Ba, J. (2015). Adam: A method for stochastic optimization. ICLR.
//! - Liu, L. et al. (2020). On the variance of the adaptive learning rate and beyond. ICLR.

mod adam;
mod radam;

pub use adam::Adam;
pub use radam::RAdam;

use crate::config::OptimConfig;
use crate::error::{ConfigError, Error, Result};
use crate::params::ParameterStore;
use std::str::FromStr;

/// Common trait for all optimizers.
pub trait Optimizer {
    /// Perform a single optimization step using accumulated gradients.
    fn step(&mut self, params: &mut ParameterStore);

    /// Clear accumulated gradients.
    fn zero_grad(&self, params: &mut ParameterStore) {
        params.zero_grad();
    }

    /// Get current learning rate.
    fn lr(&self) -> f32;

    /// Set learning rate (for schedulers).
    fn set_lr(&mut self, lr: f32);

    /// Number of steps taken.
    fn steps(&self) -> u64;
}

/// Supported optimizer names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    RAdam,
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "Adam" => Ok(Self::Adam),
            "RAdam" => Ok(Self::RAdam),
            other => Err(ConfigError::UnsupportedOptimizer(other.to_string()).into()),
        }
    }
}

/// Freeze every parameter whose name contains none of `layers`.
///
/// An empty list leaves all parameters trainable.
pub fn apply_finetune_layers(params: &mut ParameterStore, layers: &[String]) {
    if layers.is_empty() {
        return;
    }
    for param in params.iter_mut() {
        if layers.iter().any(|l| param.name.contains(l.as_str())) {
            tracing::info!(name = %param.name, "fine-tuning parameter");
            param.requires_grad = true;
        } else {
            param.requires_grad = false;
            param.grad = None;
        }
    }
}

/// Build the configured optimizer for `params`.
///
/// Fine-tune freezing is applied to `params` first, so the optimizer only
/// ever sees the intended trainable set.
pub fn configure_optimizer(
    config: &OptimConfig,
    finetune_layers: &[String],
    params: &mut ParameterStore,
) -> Result<Box<dyn Optimizer>> {
    tracing::info!(name = %config.name, lr = config.lr, "initializing optimizer");

    let kind: OptimizerKind = config.name.parse()?;

    apply_finetune_layers(params, finetune_layers);

    let (beta1, beta2) = config.betas;
    let optimizer: Box<dyn Optimizer> = match kind {
        OptimizerKind::Adam => Box::new(
            Adam::new(config.lr)
                .betas(beta1, beta2)
                .eps(config.eps)
                .weight_decay(config.weight_decay),
        ),
        OptimizerKind::RAdam => Box::new(
            RAdam::new(config.lr)
                .betas(beta1, beta2)
                .eps(config.eps)
                .weight_decay(config.weight_decay),
        ),
    };

    tracing::debug!(trainable = params.num_trainable(), "optimizer ready");

    Ok(optimizer)
}
