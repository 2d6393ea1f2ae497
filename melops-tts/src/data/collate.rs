//! Padding collation into the fixed batch tensor order.

use super::Sample;
use crate::error::{DataError, Result};
use crate::types::Tensor;
use ndarray::{Array1, Array2, Array3, s};

/// Pad `samples` into the 13-tensor batch layout, plus speaker ids as the
/// 14th tensor when `with_speaker` is set.
///
/// Text is padded with `pad_id`; every float tensor is padded with zeros.
pub fn collate(samples: &[Sample], pad_id: i64, with_speaker: bool) -> Result<Vec<Tensor>> {
    let Some(first) = samples.first() else {
        return Err(DataError::EmptyBatch.into());
    };
    let batch = samples.len();
    let n_mel = first.features.log_mel.nrows();

    let max_audio = samples.iter().map(|s| s.audio.len()).max().unwrap_or(0);
    let max_text = samples.iter().map(|s| s.tokens.len()).max().unwrap_or(0);
    let max_frames = samples
        .iter()
        .map(|s| s.features.n_frames())
        .max()
        .unwrap_or(0);

    let mut audio = Array2::<f32>::zeros((batch, max_audio));
    let mut text = Array2::<i64>::from_elem((batch, max_text), pad_id);
    let mut log_mel = Array3::<f32>::zeros((batch, n_mel, max_frames));
    let mut prior = Array3::<f32>::zeros((batch, max_frames, max_text));
    let mut pitch = Array2::<f32>::zeros((batch, max_frames));
    let mut voiced_mask = Array2::<f32>::zeros((batch, max_frames));
    let mut p_voiced = Array2::<f32>::zeros((batch, max_frames));
    let mut energy = Array2::<f32>::zeros((batch, max_frames));

    let mut audio_lens = Array1::<i64>::zeros(batch);
    let mut text_lens = Array1::<i64>::zeros(batch);
    let mut frame_lens = Array1::<i64>::zeros(batch);
    let mut speaker = Array1::<i64>::zeros(batch);

    for (b, sample) in samples.iter().enumerate() {
        let n_audio = sample.audio.len();
        let n_text = sample.tokens.len();
        let n_frames = sample.features.n_frames();
        let f = &sample.features;

        audio
            .slice_mut(s![b, ..n_audio])
            .assign(&Array1::from(sample.audio.clone()));
        text.slice_mut(s![b, ..n_text])
            .assign(&Array1::from(sample.tokens.clone()));
        log_mel.slice_mut(s![b, .., ..n_frames]).assign(&f.log_mel);
        prior
            .slice_mut(s![b, ..n_frames, ..n_text])
            .assign(&sample.prior);
        pitch.slice_mut(s![b, ..n_frames]).assign(&f.pitch);
        voiced_mask.slice_mut(s![b, ..n_frames]).assign(&f.voiced_mask);
        p_voiced.slice_mut(s![b, ..n_frames]).assign(&f.p_voiced);
        energy.slice_mut(s![b, ..n_frames]).assign(&f.energy);

        audio_lens[b] = n_audio as i64;
        text_lens[b] = n_text as i64;
        frame_lens[b] = n_frames as i64;
        speaker[b] = sample.speaker;
    }

    let mut tensors: Vec<Tensor> = vec![
        audio.into(),
        audio_lens.into(),
        text.into(),
        text_lens.into(),
        log_mel.into(),
        frame_lens.clone().into(),
        prior.into(),
        pitch.into(),
        frame_lens.clone().into(),
        voiced_mask.into(),
        p_voiced.into(),
        energy.into(),
        frame_lens.into(),
    ];
    if with_speaker {
        tensors.push(speaker.into());
    }
    Ok(tensors)
}
