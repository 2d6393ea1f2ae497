//! Loss terms, weighted aggregation and the attention losses.

mod binarization;
mod ctc;
mod radtts;
mod terms;

pub use binarization::BinarizationLoss;
pub use ctc::forward_sum_loss;
pub use radtts::{LossWeights, RadTtsLoss, keys, names};
pub(crate) use radtts::length_mask;
pub use terms::{BINARIZATION_LOSS, LossTerm, LossTerms};

use crate::error::{ConfigError, Result};
use crate::phase::PhaseFlags;
use crate::types::ModelOutputs;

/// Result of assembling a step's loss.
#[derive(Clone, Debug)]
pub struct StepLoss {
    /// Weighted total, including the binarization loss when active.
    pub total: f32,
    /// All terms, with `binarization_loss` appended last.
    pub terms: LossTerms,
}

/// Sum `value * weight` over positive-weight terms.
///
/// Errors when no term qualifies.
pub fn aggregate(terms: &LossTerms) -> Result<f32> {
    terms
        .iter()
        .filter(|(_, term)| term.weight > 0.0)
        .map(|(_, term)| term.value * term.weight)
        .reduce(|acc, x| acc + x)
        .ok_or_else(|| ConfigError::NoPositiveLossWeight { terms: terms.len() }.into())
}

/// Aggregate `terms` and append the binarization term gated by `flags`.
///
/// When `flags.kl_active` the binarization loss of the hard and soft
/// attention is added with unit weight; otherwise a zero placeholder is
/// recorded and nothing is added.
pub fn assemble(
    mut terms: LossTerms,
    outputs: &ModelOutputs,
    flags: PhaseFlags,
    kl: &BinarizationLoss,
) -> Result<StepLoss> {
    let mut total = aggregate(&terms)?;

    let binarization_loss = if flags.kl_active {
        let value = kl.compute(&outputs.attn()?, &outputs.attn_soft()?)?;
        total += value;
        value
    } else {
        0.0
    };
    terms.push(BINARIZATION_LOSS, binarization_loss, 1.0);

    Ok(StepLoss { total, terms })
}
