//! Inference through the model wrapper with an external network.

use melops_tts::config::{OptimConfig, TrainConfig};
use melops_tts::error::Result;
use melops_tts::loss::{LossTerms, LossWeights, RadTtsLoss};
use melops_tts::model::RadTtsModel;
use melops_tts::params::ParameterStore;
use melops_tts::text::CharTokenizer;
use melops_tts::traits::{ForwardInputs, SynthesisNetwork};
use melops_tts::types::ModelOutputs;
use ndarray::{Array1, Array2, Array3, Array4};

const N_MEL: usize = 5;
const FRAMES_PER_TOKEN: usize = 3;

/// Fixed-duration network whose mel frames encode token id, speaker and sigma.
#[derive(Default)]
struct RepeatNetwork {
    params: ParameterStore,
}

impl SynthesisNetwork for RepeatNetwork {
    fn forward(&mut self, _inputs: &ForwardInputs<'_>) -> Result<ModelOutputs> {
        unimplemented!("inference only")
    }

    fn infer(
        &mut self,
        speaker: &Array1<i64>,
        tokens: &Array2<i64>,
        sigma: f32,
    ) -> Result<ModelOutputs> {
        let (batch, t_text) = tokens.dim();
        let t_mel = t_text * FRAMES_PER_TOKEN;
        let mel = Array3::from_shape_fn((batch, N_MEL, t_mel), |(b, c, t)| {
            let token = tokens[[b, t / FRAMES_PER_TOKEN]] as f32;
            token + c as f32 * 0.1 + speaker[b] as f32 * 10.0 + sigma * 0.01
        });
        let attn = Array4::from_shape_fn((batch, 1, t_mel, t_text), |(_, _, t, j)| {
            if t / FRAMES_PER_TOKEN == j { 1.0 } else { 0.0 }
        });
        Ok(ModelOutputs::new()
            .with(ModelOutputs::MEL, mel)
            .with(ModelOutputs::ATTN, attn))
    }

    fn backward(&mut self, _terms: &LossTerms) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }
}

fn model() -> RadTtsModel {
    RadTtsModel::new(
        Box::new(RepeatNetwork::default()),
        Box::new(RadTtsLoss::new(LossWeights::default())),
        Box::new(CharTokenizer::new("abcdefghijklmnopqrstuvwxyz", ".,").unwrap()),
        &TrainConfig::default(),
        OptimConfig::default(),
    )
}

#[test]
fn spectrogram_has_batch_mel_time_layout() {
    let mut model = model();
    let tokens = Array2::from_shape_vec((2, 3), vec![3, 4, 5, 6, 7, 8]).unwrap();

    let mel = model.generate_spectrogram(&tokens, 0, 1.0).unwrap();

    assert_eq!(mel.dim(), (2, N_MEL, 3 * FRAMES_PER_TOKEN));
    assert!(mel.iter().all(|v| !v.is_nan()));
    assert!((mel[[1, 0, 0]] - 6.01).abs() < 1e-5);
}

#[test]
fn speaker_is_broadcast_over_batch() {
    let mut model = model();
    let tokens = Array2::from_elem((3, 2), 3);

    let mel = model.generate_spectrogram(&tokens, 2, 0.0).unwrap();

    assert!(mel.outer_iter().all(|utt| (utt[[0, 0]] - 23.0).abs() < 1e-5));
}

#[test]
fn parsed_text_feeds_inference() {
    let mut model = model();
    model.eval();

    let tokens = model.parse("hi, you", false).unwrap();
    let mel = model.generate_spectrogram(&tokens, 0, 1.0).unwrap();

    assert_eq!(tokens.dim(), (1, 7));
    assert_eq!(mel.dim(), (1, N_MEL, 7 * FRAMES_PER_TOKEN));
    assert!(!model.is_training());
}
