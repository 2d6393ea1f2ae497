//! Analytic gradients of the weighted loss terms.
//!
//! Each term's gradient matches the normalization of its masked mean in
//! [`RadTtsLoss`](crate::loss::RadTtsLoss). The alignment term carries no
//! gradient since attention is held constant.

use super::{AlignerNetwork, ForwardCache};
use crate::error::Result;
use crate::loss::{LossTerms, keys, names};
use crate::params::zeros;
use ndarray::{Array2, ArrayD, Ix2, Ix3};

pub(super) fn accumulate(
    net: &mut AlignerNetwork,
    cache: &ForwardCache,
    terms: &LossTerms,
) -> Result<()> {
    let slots = net.slots;
    let n_mel = net.n_mel;
    let mut grads = Grads::new(net);

    let mel_w = terms.active_weight(names::MEL);
    if mel_w > 0.0 {
        let pred = cache.outputs.mel()?;
        let target = cache
            .outputs
            .get(keys::MEL_TARGET)?
            .view()
            .into_dimensionality::<Ix3>()?;
        let count = n_mel * cache.out_lens.iter().sum::<usize>();
        if count > 0 {
            let scale = 2.0 * mel_w / count as f32;
            for (b, &nm) in cache.out_lens.iter().enumerate() {
                let nt = cache.in_lens[b];
                let spk = cache.speakers[b];
                for t in 0..nm {
                    for c in 0..n_mel {
                        let d = scale * (pred[[b, c, t]] - target[[b, c, t]]);
                        for j in 0..nt {
                            let g = cache.align[[b, t, j]] * d;
                            grads.text[[cache.tokens[[b, j]], c]] += g;
                            grads.speaker[[spk, c]] += g;
                        }
                    }
                }
            }
        }
    }

    let dur_w = terms.active_weight(names::DURATION);
    if dur_w > 0.0 {
        let pred = output2(cache, keys::LOG_DURATIONS_PRED)?;
        let target = output2(cache, keys::LOG_DURATIONS_TARGET)?;
        let count: usize = cache.in_lens.iter().sum();
        if count > 0 {
            let scale = 2.0 * dur_w / count as f32;
            for (b, &nt) in cache.in_lens.iter().enumerate() {
                for j in 0..nt {
                    grads.duration[[cache.tokens[[b, j]]]] += scale * (pred[[b, j]] - target[[b, j]]);
                }
            }
        }
    }

    let f0_w = terms.active_weight(names::F0);
    if f0_w > 0.0 && cache.outputs.contains(keys::F0_PRED) {
        let pred = output2(cache, keys::F0_PRED)?;
        let target = output2(cache, keys::F0_TARGET)?;
        let voiced = output2(cache, keys::VOICED_MASK)?;
        let is_voiced = |b: usize, t: usize| voiced[[b, t]] > 0.5;
        let count = frames(cache)
            .filter(|&(b, t)| is_voiced(b, t))
            .count();
        if count > 0 {
            let scale = 2.0 * f0_w / count as f32;
            let dframe = Array2::from_shape_fn(pred.dim(), |(b, t)| {
                if t < cache.out_lens[b] && is_voiced(b, t) {
                    scale * (pred[[b, t]] - target[[b, t]])
                } else {
                    0.0
                }
            });
            scatter_frames(cache, &dframe, &mut grads.pitch);
        }
    }

    let energy_w = terms.active_weight(names::ENERGY);
    if energy_w > 0.0 && cache.outputs.contains(keys::ENERGY_PRED) {
        let pred = output2(cache, keys::ENERGY_PRED)?;
        let target = output2(cache, keys::ENERGY_TARGET)?;
        let count = frames(cache).count();
        if count > 0 {
            let scale = 2.0 * energy_w / count as f32;
            let dframe = masked_frames(cache, pred.dim(), |b, t| {
                scale * (pred[[b, t]] - target[[b, t]])
            });
            scatter_frames(cache, &dframe, &mut grads.energy);
        }
    }

    let vpred_w = terms.active_weight(names::VPRED);
    if vpred_w > 0.0 && cache.outputs.contains(keys::VOICED_LOGITS) {
        let logits = output2(cache, keys::VOICED_LOGITS)?;
        let voiced = output2(cache, keys::VOICED_MASK)?;
        let count = frames(cache).count();
        if count > 0 {
            let scale = vpred_w / count as f32;
            let dframe = masked_frames(cache, logits.dim(), |b, t| {
                scale * (sigmoid(logits[[b, t]]) - voiced[[b, t]])
            });
            scatter_frames(cache, &dframe, &mut grads.voicing);
        }
    }

    let params = &mut net.params;
    params.by_index_mut(slots.text).accumulate(&grads.text.into_dyn());
    params.by_index_mut(slots.speaker).accumulate(&grads.speaker.into_dyn());
    params.by_index_mut(slots.duration).accumulate(&grads.duration);
    params.by_index_mut(slots.pitch).accumulate(&grads.pitch);
    params.by_index_mut(slots.energy).accumulate(&grads.energy);
    params.by_index_mut(slots.voicing).accumulate(&grads.voicing);

    Ok(())
}

struct Grads {
    text: Array2<f32>,
    speaker: Array2<f32>,
    duration: ArrayD<f32>,
    pitch: ArrayD<f32>,
    energy: ArrayD<f32>,
    voicing: ArrayD<f32>,
}

impl Grads {
    fn new(net: &AlignerNetwork) -> Self {
        Self {
            text: Array2::zeros((net.n_vocab, net.n_mel)),
            speaker: Array2::zeros((net.n_speakers, net.n_mel)),
            duration: zeros(&[net.n_vocab]),
            pitch: zeros(&[net.n_vocab]),
            energy: zeros(&[net.n_vocab]),
            voicing: zeros(&[net.n_vocab]),
        }
    }
}

fn output2(cache: &ForwardCache, name: &str) -> Result<Array2<f32>> {
    Ok(cache.outputs.get(name)?.clone().into_dimensionality::<Ix2>()?)
}

/// Valid `(b, t)` frame positions.
fn frames(cache: &ForwardCache) -> impl Iterator<Item = (usize, usize)> + '_ {
    cache
        .out_lens
        .iter()
        .enumerate()
        .flat_map(|(b, &nm)| (0..nm).map(move |t| (b, t)))
}

fn masked_frames(
    cache: &ForwardCache,
    dim: (usize, usize),
    f: impl Fn(usize, usize) -> f32,
) -> Array2<f32> {
    Array2::from_shape_fn(dim, |(b, t)| {
        if t < cache.out_lens[b] { f(b, t) } else { 0.0 }
    })
}

/// Route frame gradients to token table entries through the alignment.
fn scatter_frames(cache: &ForwardCache, dframe: &Array2<f32>, table: &mut ArrayD<f32>) {
    for (b, &nm) in cache.out_lens.iter().enumerate() {
        for t in 0..nm {
            let d = dframe[[b, t]];
            if d == 0.0 {
                continue;
            }
            for j in 0..cache.in_lens[b] {
                table[[cache.tokens[[b, j]]]] += cache.align[[b, t, j]] * d;
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
