//! Embedding aligner: a compact attention-aligned mel predictor.
//!
//! Every token owns a key vector in mel space plus scalar log-duration,
//! log-pitch, log-energy and voicing entries. During training the soft
//! alignment between mel frames and tokens is
//!
//! ```text
//! attn_logprob = log_softmax(-temperature * ‖mel_t - key_j‖²) + log(prior)
//! attn_soft    = softmax(attn_logprob)
//! ```
//!
//! and the hard alignment is the monotonic alignment search path through
//! `attn_soft`. Frame-level predictions are attention-weighted token
//! entries. Attention is treated as a constant when computing gradients.

mod backward;
mod mas;

pub use mas::{durations, monotonic_alignment};

use crate::error::{ModelError, Result};
use crate::loss::{keys, length_mask};
use crate::params::{ParameterStore, zeros};
use crate::traits::{ForwardInputs, SynthesisNetwork};
use crate::types::ModelOutputs;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, ArrayView2, Ix3, IxDyn, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

pub const TEXT_EMBEDDING: &str = "text.embedding";
pub const SPEAKER_EMBEDDING: &str = "speaker.embedding";
pub const DURATION_TABLE: &str = "duration.table";
pub const PITCH_TABLE: &str = "pitch.table";
pub const ENERGY_TABLE: &str = "energy.table";
pub const VOICING_TABLE: &str = "voicing.table";
pub const RESIDUAL_STD: &str = "decoder.residual_std";

/// Output name of per-token durations at inference.
pub const DURATIONS: &str = "durations";

const PRIOR_FLOOR: f32 = 1e-8;
const RESIDUAL_EMA: f32 = 0.99;

/// Indices of the registered parameters.
#[derive(Clone, Copy, Debug)]
struct Slots {
    text: usize,
    speaker: usize,
    duration: usize,
    pitch: usize,
    energy: usize,
    voicing: usize,
    residual_std: usize,
}

/// State kept from `forward` for `backward`.
#[derive(Clone, Debug)]
struct ForwardCache {
    tokens: Array2<usize>,
    speakers: Vec<usize>,
    in_lens: Vec<usize>,
    out_lens: Vec<usize>,
    /// Alignment used for frame-level predictions `(B, T_mel, T_text)`
    align: Array3<f32>,
    outputs: ModelOutputs,
}

/// Reference [`SynthesisNetwork`] with analytic gradients.
#[derive(Debug)]
pub struct AlignerNetwork {
    params: ParameterStore,
    slots: Slots,
    n_vocab: usize,
    n_mel: usize,
    n_speakers: usize,
    temperature: f32,
    seed: u64,
    cache: Option<ForwardCache>,
}

impl AlignerNetwork {
    pub fn new(
        n_vocab: usize,
        n_mel: usize,
        n_speakers: usize,
        temperature: f32,
        init_scale: f32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = ParameterStore::new();

        let slots = Slots {
            text: params.register(TEXT_EMBEDDING, normal(&mut rng, &[n_vocab, n_mel], init_scale)),
            speaker: params.register(SPEAKER_EMBEDDING, zeros(&[n_speakers, n_mel])),
            duration: params.register(DURATION_TABLE, zeros(&[n_vocab])),
            pitch: params.register(PITCH_TABLE, zeros(&[n_vocab])),
            energy: params.register(ENERGY_TABLE, zeros(&[n_vocab])),
            voicing: params.register(VOICING_TABLE, zeros(&[n_vocab])),
            residual_std: params.register(RESIDUAL_STD, ArrayD::ones(IxDyn(&[n_mel]))),
        };

        tracing::debug!(n_vocab, n_mel, n_speakers, params = params.num_trainable(), "aligner network initialized");

        Self {
            params,
            slots,
            n_vocab,
            n_mel,
            n_speakers,
            temperature,
            seed,
            cache: None,
        }
    }

    pub fn n_mel(&self) -> usize {
        self.n_mel
    }

    fn table(&self, slot: usize) -> &ArrayD<f32> {
        &self.params.by_index(slot).value
    }

    fn token(&self, id: i64) -> Result<usize> {
        usize::try_from(id)
            .ok()
            .filter(|&t| t < self.n_vocab)
            .ok_or_else(|| {
                ModelError::TokenOutOfRange {
                    id,
                    vocab: self.n_vocab,
                }
                .into()
            })
    }

    fn speaker(&self, id: i64) -> Result<usize> {
        usize::try_from(id)
            .ok()
            .filter(|&s| s < self.n_speakers)
            .ok_or_else(|| {
                ModelError::SpeakerOutOfRange {
                    id,
                    n_speakers: self.n_speakers,
                }
                .into()
            })
    }

    /// Key vectors `(T_text, n_mel)` for one utterance.
    fn keys(&self, tokens: &[usize], speaker: usize) -> Array2<f32> {
        let text = self.table(self.slots.text);
        let spk = self.table(self.slots.speaker);
        Array2::from_shape_fn((tokens.len(), self.n_mel), |(j, c)| {
            text[[tokens[j], c]] + spk[[speaker, c]]
        })
    }

    /// Attention-weighted lookup of a per-token table for each frame.
    fn frame_values(align: ArrayView2<f32>, table: &ArrayD<f32>, tokens: &[usize]) -> Array1<f32> {
        let per_token = Array1::from_iter(tokens.iter().map(|&t| table[[t]]));
        align.dot(&per_token)
    }

    /// Soft attention log-probabilities `(n_mel_frames, n_text)` for one utterance.
    fn attention_logprob(
        &self,
        mel: ArrayView2<f32>,
        keys: &Array2<f32>,
        prior: Option<ArrayView2<f32>>,
    ) -> Array2<f32> {
        let (n_frames, n_text) = (mel.ncols(), keys.nrows());
        let mut scores = Array2::from_shape_fn((n_frames, n_text), |(t, j)| {
            let dist: f32 = mel
                .column(t)
                .iter()
                .zip(keys.row(j))
                .map(|(m, k)| (m - k).powi(2))
                .sum();
            -self.temperature * dist
        });

        if let Some(prior) = prior {
            log_softmax_rows(&mut scores);
            scores.zip_mut_with(&prior, |s, &p| *s += (p + PRIOR_FLOOR).ln());
        }
        scores
    }
}

impl SynthesisNetwork for AlignerNetwork {
    fn forward(&mut self, inputs: &ForwardInputs<'_>) -> Result<ModelOutputs> {
        let (batch, n_mel, t_mel) = inputs.mel.dim();
        let t_text = inputs.text.ncols();
        if n_mel != self.n_mel {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }
        let rows_match = [
            inputs.text.nrows(),
            inputs.in_lens.len(),
            inputs.out_lens.len(),
            inputs.speaker_ids.len(),
        ]
        .iter()
        .all(|&n| n == batch);
        let prior_covers = inputs.attn_prior.is_none_or(|p| {
            let (pb, pm, pt) = p.dim();
            pb >= batch && pm >= t_mel && pt >= t_text
        });
        if !rows_match || !prior_covers {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }

        let mut tokens = Array2::<usize>::zeros((batch, t_text));
        let mut speakers = Vec::with_capacity(batch);
        let in_lens: Vec<usize> = (0..batch)
            .map(|b| (inputs.in_lens[b].max(0) as usize).min(t_text))
            .collect();
        let out_lens: Vec<usize> = (0..batch)
            .map(|b| (inputs.out_lens[b].max(0) as usize).min(t_mel))
            .collect();

        let mut attn_logprob = Array4::<f32>::zeros((batch, 1, t_mel, t_text));
        let mut attn_soft = Array4::<f32>::zeros((batch, 1, t_mel, t_text));
        let mut attn_hard = Array4::<f32>::zeros((batch, 1, t_mel, t_text));
        let mut align = Array3::<f32>::zeros((batch, t_mel, t_text));
        let mut mel_pred = Array3::<f32>::zeros((batch, n_mel, t_mel));
        let mut dur_pred = Array2::<f32>::zeros((batch, t_text));
        let mut dur_target = Array2::<f32>::zeros((batch, t_text));
        let mut f0_pred = Array2::<f32>::zeros((batch, t_mel));
        let mut energy_pred = Array2::<f32>::zeros((batch, t_mel));
        let mut voiced_logits = Array2::<f32>::zeros((batch, t_mel));

        for b in 0..batch {
            let (nt, nm) = (in_lens[b], out_lens[b]);
            for j in 0..nt {
                tokens[[b, j]] = self.token(inputs.text[[b, j]])?;
            }
            let speaker = self.speaker(inputs.speaker_ids[b])?;
            speakers.push(speaker);
            if nt == 0 || nm == 0 {
                continue;
            }

            let toks: Vec<usize> = tokens.slice(s![b, ..nt]).to_vec();
            let keys = self.keys(&toks, speaker);
            let mel = inputs.mel.slice(s![b, .., ..nm]);
            let prior = inputs.attn_prior.map(|p| p.slice(s![b, ..nm, ..nt]));

            let logprob = self.attention_logprob(mel, &keys, prior);
            let mut soft = logprob.clone();
            softmax_rows(&mut soft);
            let hard = monotonic_alignment(soft.mapv(|p| p.max(f32::MIN_POSITIVE).ln()).view());

            attn_logprob.slice_mut(s![b, 0, ..nm, ..nt]).assign(&logprob);
            attn_soft.slice_mut(s![b, 0, ..nm, ..nt]).assign(&soft);
            attn_hard.slice_mut(s![b, 0, ..nm, ..nt]).assign(&hard);

            let a = if inputs.binarize_attention { &hard } else { &soft };
            align.slice_mut(s![b, ..nm, ..nt]).assign(a);

            mel_pred
                .slice_mut(s![b, .., ..nm])
                .assign(&a.dot(&keys).t());

            let durs = durations(hard.view());
            let dur_table = self.table(self.slots.duration);
            for j in 0..nt {
                dur_pred[[b, j]] = dur_table[[toks[j]]];
                dur_target[[b, j]] = durs[j].ln_1p();
            }

            f0_pred
                .slice_mut(s![b, ..nm])
                .assign(&Self::frame_values(a.view(), self.table(self.slots.pitch), &toks));
            energy_pred
                .slice_mut(s![b, ..nm])
                .assign(&Self::frame_values(a.view(), self.table(self.slots.energy), &toks));
            voiced_logits
                .slice_mut(s![b, ..nm])
                .assign(&Self::frame_values(a.view(), self.table(self.slots.voicing), &toks));
        }

        let attn = if inputs.binarize_attention {
            attn_hard
        } else {
            attn_soft.clone()
        };

        let mut outputs = ModelOutputs::new()
            .with(ModelOutputs::MEL, mel_pred)
            .with(keys::MEL_TARGET, inputs.mel.clone())
            .with(ModelOutputs::ATTN, attn)
            .with(ModelOutputs::ATTN_SOFT, attn_soft)
            .with(keys::ATTN_LOGPROB, attn_logprob)
            .with(keys::LOG_DURATIONS_PRED, dur_pred)
            .with(keys::LOG_DURATIONS_TARGET, dur_target);

        if let Some(f0) = inputs.f0 {
            let voiced = inputs
                .voiced_mask
                .cloned()
                .unwrap_or_else(|| f0.mapv(|f| if f > 0.0 { 1.0 } else { 0.0 }));
            let f0_target = f0.mapv(|f| if f > 0.0 { f.ln() } else { 0.0 });
            outputs.insert(keys::F0_PRED, f0_pred);
            outputs.insert(keys::F0_TARGET, f0_target);
            outputs.insert(keys::VOICED_LOGITS, voiced_logits);
            outputs.insert(keys::VOICED_MASK, voiced);
        }
        if let Some(energy) = inputs.energy_avg {
            outputs.insert(keys::ENERGY_PRED, energy_pred);
            outputs.insert(keys::ENERGY_TARGET, energy.mapv(|e| e.max(0.0).ln_1p()));
        }

        self.cache = Some(ForwardCache {
            tokens,
            speakers,
            in_lens,
            out_lens,
            align,
            outputs: outputs.clone(),
        });

        Ok(outputs)
    }

    fn infer(
        &mut self,
        speaker: &Array1<i64>,
        tokens: &Array2<i64>,
        sigma: f32,
    ) -> Result<ModelOutputs> {
        let (batch, t_text) = tokens.dim();
        if speaker.len() != batch {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }

        let dur_table = self.table(self.slots.duration);
        let mut per_utt = Vec::with_capacity(batch);
        for b in 0..batch {
            let toks = tokens
                .row(b)
                .iter()
                .map(|&id| self.token(id))
                .collect::<Result<Vec<_>>>()?;
            let spk = self.speaker(speaker[b])?;
            let durs: Vec<usize> = toks
                .iter()
                .map(|&t| (dur_table[[t]].exp() - 1.0).round().max(1.0) as usize)
                .collect();
            per_utt.push((toks, spk, durs));
        }

        let t_mel = per_utt
            .iter()
            .map(|(_, _, d)| d.iter().sum::<usize>())
            .max()
            .unwrap_or(0);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let std = self.table(self.slots.residual_std);
        let mut mel = Array3::<f32>::zeros((batch, self.n_mel, t_mel));
        let mut attn = Array4::<f32>::zeros((batch, 1, t_mel, t_text));
        let mut out_durations = Array2::<f32>::zeros((batch, t_text));

        for (b, (toks, spk, durs)) in per_utt.iter().enumerate() {
            let keys = self.keys(toks, *spk);
            let mut t = 0;
            for (j, &d) in durs.iter().enumerate() {
                out_durations[[b, j]] = d as f32;
                for _ in 0..d {
                    attn[[b, 0, t, j]] = 1.0;
                    for c in 0..self.n_mel {
                        mel[[b, c, t]] = keys[[j, c]] + sigma * std[[c]] * standard_normal(&mut rng);
                    }
                    t += 1;
                }
            }
        }

        tracing::debug!(batch, frames = t_mel, sigma, "aligner inference");

        Ok(ModelOutputs::new()
            .with(ModelOutputs::MEL, mel)
            .with(ModelOutputs::ATTN, attn)
            .with(DURATIONS, out_durations))
    }

    fn backward(&mut self, terms: &crate::loss::LossTerms) -> Result<()> {
        let cache = self.cache.take().ok_or(ModelError::NoForwardCache)?;
        let result = backward::accumulate(self, &cache, terms);
        self.update_residual_std(&cache)?;
        result
    }

    fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }
}

impl AlignerNetwork {
    /// Track the per-channel RMS of teacher-forced mel residuals, used to
    /// scale inference noise.
    fn update_residual_std(&mut self, cache: &ForwardCache) -> Result<()> {
        if !self.params.by_index(self.slots.residual_std).requires_grad {
            return Ok(());
        }
        let pred = cache.outputs.mel()?;
        let target = cache
            .outputs
            .get(keys::MEL_TARGET)?
            .clone()
            .into_dimensionality::<Ix3>()?;
        let lens = Array1::from_iter(cache.out_lens.iter().map(|&l| l as i64));
        let mask = length_mask(&lens, pred.shape()[2]);

        let mut sq = Array1::<f32>::zeros(self.n_mel);
        let mut count = 0_usize;
        for ((b, c, t), &p) in pred.indexed_iter() {
            if mask[[b, t]] {
                let r = p - target[[b, c, t]];
                sq[c] += r * r;
                if c == 0 {
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Ok(());
        }

        let std = &mut self.params.by_index_mut(self.slots.residual_std).value;
        for c in 0..self.n_mel {
            let rms = (sq[c] / count as f32).sqrt();
            std[[c]] = RESIDUAL_EMA * std[[c]] + (1.0 - RESIDUAL_EMA) * rms;
        }
        Ok(())
    }
}

/// Standard normal sample via Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(0.0001_f32..1.0_f32);
    let u2: f32 = rng.gen_range(0.0_f32..1.0_f32);
    (-2.0_f32 * u1.ln()).sqrt() * (2.0_f32 * PI * u2).cos()
}

fn normal(rng: &mut StdRng, shape: &[usize], std: f32) -> ArrayD<f32> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || std * standard_normal(rng))
}

fn log_softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let lse = max + row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|v| v - lse);
    }
}

fn softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Batch;
    use ndarray::{Array1, array};

    pub(super) fn tiny_batch() -> Batch {
        // Two tokens; frames 0-1 sit on token 0's key, frames 2-4 on token 1's
        let mut log_mel = Array3::<f32>::zeros((1, 2, 5));
        for t in 0..5 {
            let (a, b) = if t < 2 { (1.0, 0.0) } else { (0.0, 1.0) };
            log_mel[[0, 0, t]] = a;
            log_mel[[0, 1, t]] = b;
        }
        Batch {
            audio: Array2::zeros((1, 10)),
            audio_lens: array![10],
            text: array![[0_i64, 1]],
            text_lens: array![2],
            log_mel,
            log_mel_lens: array![5],
            align_prior_matrix: Array3::from_elem((1, 5, 2), 0.5),
            pitch: Array2::from_elem((1, 5), 100.0),
            pitch_lens: array![5],
            voiced_mask: Array2::ones((1, 5)),
            p_voiced: Array2::ones((1, 5)),
            energy: Array2::ones((1, 5)),
            energy_lens: array![5],
            speaker_id: array![0],
        }
    }

    pub(super) fn tiny_network() -> AlignerNetwork {
        let mut net = AlignerNetwork::new(2, 2, 1, 5.0, 0.1, 0);
        net.params
            .by_index_mut(net.slots.text)
            .value
            .assign(&array![[1.0_f32, 0.0], [0.0, 1.0]].into_dyn());
        net
    }

    #[test]
    fn forward_rejects_short_speaker_ids() {
        let mut net = tiny_network();
        let mut batch = tiny_batch();
        batch.speaker_id = Array1::zeros(0);

        assert!(net.forward(&ForwardInputs::from_batch(&batch, true)).is_err());
    }

    #[test]
    fn forward_rejects_mismatched_lengths_and_prior() {
        let mut net = tiny_network();

        let mut batch = tiny_batch();
        batch.text_lens = array![2, 2];
        assert!(net.forward(&ForwardInputs::from_batch(&batch, true)).is_err());

        let mut batch = tiny_batch();
        batch.log_mel_lens = Array1::zeros(0);
        assert!(net.forward(&ForwardInputs::from_batch(&batch, true)).is_err());

        let mut batch = tiny_batch();
        batch.align_prior_matrix = Array3::from_elem((1, 3, 2), 0.5);
        assert!(net.forward(&ForwardInputs::from_batch(&batch, true)).is_err());
    }

    #[test]
    fn forward_shapes_and_alignment() {
        let mut net = tiny_network();
        let batch = tiny_batch();

        let out = net.forward(&ForwardInputs::from_batch(&batch, true)).unwrap();

        assert_eq!(out.mel().unwrap().dim(), (1, 2, 5));
        let attn = out.attn().unwrap();
        assert_eq!(attn.dim(), (1, 1, 5, 2));
        let expected = [0, 0, 1, 1, 1];
        for (t, &j) in expected.iter().enumerate() {
            assert_eq!(attn[[0, 0, t, j]], 1.0);
        }
        let soft = out.attn_soft().unwrap();
        for t in 0..5 {
            assert!((soft.slice(s![0, 0, t, ..]).sum() - 1.0).abs() < 1e-5);
        }
        let dur_target = out.get(keys::LOG_DURATIONS_TARGET).unwrap();
        assert!((dur_target[[0, 0]] - 3.0_f32.ln()).abs() < 1e-6);
        assert!((dur_target[[0, 1]] - 4.0_f32.ln()).abs() < 1e-6);
        // Hard alignment on exact keys reproduces the target
        let mel = out.mel().unwrap();
        assert!(mel.iter().zip(&batch.log_mel).all(|(p, t)| (p - t).abs() < 1e-6));
    }

    #[test]
    fn soft_attention_used_without_binarization() {
        let mut net = tiny_network();
        let batch = tiny_batch();

        let out = net.forward(&ForwardInputs::from_batch(&batch, false)).unwrap();

        assert_eq!(out.attn().unwrap(), out.attn_soft().unwrap());
    }

    #[test]
    fn rejects_out_of_range_tokens() {
        let mut net = tiny_network();
        let mut batch = tiny_batch();
        batch.text[[0, 1]] = 9;

        let err = net.forward(&ForwardInputs::from_batch(&batch, true)).unwrap_err();

        assert!(matches!(
            err,
            crate::error::Error::Model(ModelError::TokenOutOfRange { id: 9, vocab: 2 })
        ));
    }

    #[test]
    fn backward_requires_forward() {
        let mut net = tiny_network();

        assert!(net.backward(&crate::loss::LossTerms::new()).is_err());
    }

    #[test]
    fn inference_is_deterministic_and_finite() {
        let mut net = tiny_network();
        let tokens = array![[0_i64, 1, 1]];
        let speaker = Array1::zeros(1);

        let a = net.infer(&speaker, &tokens, 1.0).unwrap().mel().unwrap();
        let b = net.infer(&speaker, &tokens, 1.0).unwrap().mel().unwrap();

        // Zero log-durations round to one frame per token
        assert_eq!(a.dim(), (1, 2, 3));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_sigma_returns_keys() {
        let mut net = tiny_network();

        let out = net.infer(&array![0], &array![[1_i64, 0]], 0.0).unwrap();

        assert_eq!(out.mel().unwrap(), array![[[0.0_f32, 1.0], [1.0, 0.0]]]);
        assert_eq!(out.get(DURATIONS).unwrap().as_slice().unwrap(), &[1.0, 1.0]);
    }
}
