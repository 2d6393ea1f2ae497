//! Core traits for the model wrapper's collaborators.

use crate::error::Result;
use crate::loss::LossTerms;
use crate::params::ParameterStore;
use crate::types::{Batch, ModelOutputs};
use image::RgbImage;
use ndarray::{Array1, Array2, Array3};

/// Inputs to a training/validation forward pass.
#[derive(Clone, Copy, Debug)]
pub struct ForwardInputs<'a> {
    pub mel: &'a Array3<f32>,
    pub speaker_ids: &'a Array1<i64>,
    pub text: &'a Array2<i64>,
    pub in_lens: &'a Array1<i64>,
    pub out_lens: &'a Array1<i64>,
    pub binarize_attention: bool,
    pub attn_prior: Option<&'a Array3<f32>>,
    pub f0: Option<&'a Array2<f32>>,
    pub energy_avg: Option<&'a Array2<f32>>,
    pub voiced_mask: Option<&'a Array2<f32>>,
    pub p_voiced: Option<&'a Array2<f32>>,
}

impl<'a> ForwardInputs<'a> {
    /// Borrow every field of a batch.
    pub fn from_batch(batch: &'a Batch, binarize_attention: bool) -> Self {
        Self {
            mel: &batch.log_mel,
            speaker_ids: &batch.speaker_id,
            text: &batch.text,
            in_lens: &batch.text_lens,
            out_lens: &batch.log_mel_lens,
            binarize_attention,
            attn_prior: Some(&batch.align_prior_matrix),
            f0: Some(&batch.pitch),
            energy_avg: Some(&batch.energy),
            voiced_mask: Some(&batch.voiced_mask),
            p_voiced: Some(&batch.p_voiced),
        }
    }
}

/// Synthesis network producing mel-spectrograms and text/audio alignments.
///
/// This trait abstracts over network architectures while the wrapper only
/// depends on the `attn`, `attn_soft` and `mel` outputs.
///
/// Note: Takes `&mut self` so implementations can cache activations between
/// `forward` and `backward`.
pub trait SynthesisNetwork {
    /// Teacher-forced pass over a batch.
    fn forward(&mut self, inputs: &ForwardInputs<'_>) -> Result<ModelOutputs>;

    /// Free-running synthesis with hard alignment and no attention prior.
    ///
    /// `speaker` is `(B,)`, `tokens` is `(B, T_text)`. The returned `mel`
    /// is `(B, n_mel, T)`.
    fn infer(
        &mut self,
        speaker: &Array1<i64>,
        tokens: &Array2<i64>,
        sigma: f32,
    ) -> Result<ModelOutputs>;

    /// Accumulate parameter gradients of the weighted loss of the last
    /// `forward` call. Terms with non-positive weight contribute nothing.
    fn backward(&mut self, terms: &LossTerms) -> Result<()>;

    fn parameters(&self) -> &ParameterStore;

    fn parameters_mut(&mut self) -> &mut ParameterStore;
}

/// Loss module mapping network outputs to named, weighted terms.
pub trait LossModule {
    fn compute(
        &self,
        outputs: &ModelOutputs,
        in_lens: &Array1<i64>,
        out_lens: &Array1<i64>,
    ) -> Result<LossTerms>;
}

/// Destination for scalar metrics and images.
pub trait MetricsSink {
    fn log_scalar(&mut self, name: &str, value: f32, step: u64) -> Result<()>;

    /// Images are HWC RGB.
    fn log_image(&mut self, tag: &str, image: &RgbImage, step: u64) -> Result<()>;
}

/// Text to token-id conversion.
pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>>;

    fn pad_id(&self) -> i64;

    fn vocab_size(&self) -> usize;
}

/// Text to spoken-form text conversion.
pub trait TextNormalizer {
    fn normalize(&self, text: &str) -> String;
}
