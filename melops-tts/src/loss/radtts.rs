//! Composite spectrogram/variance loss for attention-aligned synthesis networks.

use super::ctc::forward_sum_loss;
use super::terms::LossTerms;
use crate::error::Result;
use crate::traits::LossModule;
use crate::types::ModelOutputs;
use ndarray::{Array1, Array2, ArrayD, Axis, ErrorKind, Ix2, Ix4, ShapeError, Zip};
use serde::{Deserialize, Serialize};

/// Per-term loss weights. Non-positive weights keep a term logged but out
/// of the total.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub mel: f32,
    pub duration: f32,
    pub f0: f32,
    pub energy: f32,
    pub vpred: f32,
    pub ctc: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            mel: 1.0,
            duration: 1.0,
            f0: 1.0,
            energy: 1.0,
            vpred: 1.0,
            ctc: 0.1,
        }
    }
}

/// Output names read by [`RadTtsLoss`] besides `mel`.
pub mod keys {
    pub const MEL_TARGET: &str = "mel_target";
    pub const ATTN_LOGPROB: &str = "attn_logprob";
    pub const LOG_DURATIONS_PRED: &str = "log_durations_pred";
    pub const LOG_DURATIONS_TARGET: &str = "log_durations_target";
    pub const F0_PRED: &str = "f0_pred";
    pub const F0_TARGET: &str = "f0_target";
    pub const VOICED_MASK: &str = "voiced_mask";
    pub const ENERGY_PRED: &str = "energy_pred";
    pub const ENERGY_TARGET: &str = "energy_target";
    pub const VOICED_LOGITS: &str = "voiced_logits";
}

/// Loss term names emitted by [`RadTtsLoss`].
pub mod names {
    pub const MEL: &str = "loss_mel";
    pub const DURATION: &str = "loss_duration";
    pub const F0: &str = "loss_f0";
    pub const ENERGY: &str = "loss_energy";
    pub const VPRED: &str = "loss_vpred";
    pub const CTC: &str = "loss_ctc";
}

/// Masked regression losses over mel, duration, pitch, energy and voicing
/// plus the forward-sum alignment loss.
///
/// Only `mel` and `mel_target` are required; every other term is emitted
/// when the network produced its outputs.
#[derive(Clone, Debug, Default)]
pub struct RadTtsLoss {
    pub weights: LossWeights,
}

impl RadTtsLoss {
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }
}

impl LossModule for RadTtsLoss {
    fn compute(
        &self,
        outputs: &ModelOutputs,
        in_lens: &Array1<i64>,
        out_lens: &Array1<i64>,
    ) -> Result<LossTerms> {
        let w = &self.weights;
        let mut terms = LossTerms::new();

        let mel = outputs.get(ModelOutputs::MEL)?;
        let mel_target = outputs.get(keys::MEL_TARGET)?;
        let frame_mask = length_mask(out_lens, mel.shape()[2])
            .insert_axis(Axis(1))
            .into_dyn();
        terms.push(names::MEL, masked_mse(mel, mel_target, &frame_mask)?, w.mel);

        if let (Ok(pred), Ok(target)) = (
            outputs.get(keys::LOG_DURATIONS_PRED),
            outputs.get(keys::LOG_DURATIONS_TARGET),
        ) {
            let mask = length_mask(in_lens, pred.shape()[1]).into_dyn();
            terms.push(names::DURATION, masked_mse(pred, target, &mask)?, w.duration);
        }

        if let (Ok(pred), Ok(target), Ok(voiced)) = (
            outputs.get(keys::F0_PRED),
            outputs.get(keys::F0_TARGET),
            outputs.get(keys::VOICED_MASK),
        ) {
            let voiced = voiced.view().into_dimensionality::<Ix2>()?;
            let mask = voiced_frame_mask(out_lens, &voiced).into_dyn();
            terms.push(names::F0, masked_mse(pred, target, &mask)?, w.f0);
        }

        if let (Ok(pred), Ok(target)) = (
            outputs.get(keys::ENERGY_PRED),
            outputs.get(keys::ENERGY_TARGET),
        ) {
            let mask = length_mask(out_lens, pred.shape()[1]).into_dyn();
            terms.push(names::ENERGY, masked_mse(pred, target, &mask)?, w.energy);
        }

        if let (Ok(logits), Ok(voiced)) = (
            outputs.get(keys::VOICED_LOGITS),
            outputs.get(keys::VOICED_MASK),
        ) {
            let mask = length_mask(out_lens, logits.shape()[1]).into_dyn();
            terms.push(
                names::VPRED,
                masked_bce_with_logits(logits, voiced, &mask)?,
                w.vpred,
            );
        }

        if let Ok(logprob) = outputs.get(keys::ATTN_LOGPROB) {
            let logprob = logprob.clone().into_dimensionality::<Ix4>()?;
            terms.push(
                names::CTC,
                forward_sum_loss(&logprob, in_lens, out_lens),
                w.ctc,
            );
        }

        Ok(terms)
    }
}

/// `(B, max_len)` mask, true where `t < lens[b]`.
pub(crate) fn length_mask(lens: &Array1<i64>, max_len: usize) -> Array2<bool> {
    Array2::from_shape_fn((lens.len(), max_len), |(b, t)| (t as i64) < lens[b])
}

/// Length mask restricted to voiced frames.
pub(crate) fn voiced_frame_mask(
    lens: &Array1<i64>,
    voiced: &ndarray::ArrayView2<f32>,
) -> Array2<bool> {
    let mask = length_mask(lens, voiced.ncols());
    Zip::from(&mask)
        .and(voiced)
        .map_collect(|&m, &v| m && v > 0.5)
}

fn incompatible() -> ShapeError {
    ShapeError::from_kind(ErrorKind::IncompatibleShape)
}

/// Mean of `f(pred, target)` over positions where the broadcast mask is set.
fn masked_mean(
    pred: &ArrayD<f32>,
    target: &ArrayD<f32>,
    mask: &ArrayD<bool>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<f32> {
    if pred.shape() != target.shape() {
        return Err(incompatible().into());
    }
    let mask = mask.broadcast(pred.raw_dim()).ok_or_else(incompatible)?;

    let (sum, count) = Zip::from(pred).and(target).and(&mask).fold(
        (0.0_f32, 0_usize),
        |(sum, count), &p, &t, &m| {
            if m { (sum + f(p, t), count + 1) } else { (sum, count) }
        },
    );

    Ok(if count == 0 { 0.0 } else { sum / count as f32 })
}

fn masked_mse(pred: &ArrayD<f32>, target: &ArrayD<f32>, mask: &ArrayD<bool>) -> Result<f32> {
    masked_mean(pred, target, mask, |p, t| (p - t).powi(2))
}

fn masked_bce_with_logits(
    logits: &ArrayD<f32>,
    target: &ArrayD<f32>,
    mask: &ArrayD<bool>,
) -> Result<f32> {
    // max(x, 0) - x*y + log(1 + exp(-|x|))
    masked_mean(logits, target, mask, |x, y| {
        x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
    })
}
