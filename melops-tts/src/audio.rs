//! Audio loading and acoustic feature extraction.

use crate::config::DatasetConfig;
use crate::error::{DataError, Result};
use hound::{SampleFormat, WavReader, WavSpec};
use ndarray::{Array1, Array2, Axis};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use std::path::Path;

/// Log floor applied to mel magnitudes.
const LOG_FLOOR: f32 = 1e-5;

/// Normalized autocorrelation above which a frame counts as voiced.
const VOICING_THRESHOLD: f32 = 0.5;

/// Frames quieter than this RMS are unvoiced regardless of periodicity.
const SILENCE_RMS: f32 = 1e-3;

/// Load audio from a WAV file.
///
/// Returns audio samples and WAV specification.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, WavSpec)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
            .collect::<hound::Result<_>>()?,
    };

    Ok((samples, spec))
}

/// Load audio from a WAV file as mono f32 samples at `sample_rate`.
///
/// Stereo is averaged down to mono. Other channel counts and mismatched
/// sample rates are rejected.
pub fn read_audio_mono(path: impl AsRef<Path>, sample_rate: u32) -> Result<Vec<f32>> {
    let (mut audio, spec) = load_audio(path)?;

    if spec.sample_rate != sample_rate {
        return Err(DataError::InvalidSampleRate {
            expected: sample_rate,
            got: spec.sample_rate,
        }
        .into());
    }

    if spec.channels == 0 || spec.channels > 2 {
        return Err(DataError::InvalidChannels(spec.channels).into());
    }

    if spec.channels == 2 {
        audio = audio
            .chunks(2)
            .map(|chunk| chunk.iter().sum::<f32>() / 2.0)
            .collect();
    }

    Ok(audio)
}

/// Frame-level acoustic features of one utterance.
#[derive(Clone, Debug)]
pub struct Features {
    /// `(n_mels, T)` natural-log mel magnitudes
    pub log_mel: Array2<f32>,
    /// `(T,)` L2 norm of each frame's magnitude spectrum
    pub energy: Array1<f32>,
    /// `(T,)` fundamental frequency in Hz, 0 when unvoiced
    pub pitch: Array1<f32>,
    /// `(T,)` 1.0 for voiced frames
    pub voiced_mask: Array1<f32>,
    /// `(T,)` voicing probability
    pub p_voiced: Array1<f32>,
}

impl Features {
    pub fn n_frames(&self) -> usize {
        self.energy.len()
    }
}

/// STFT-based extractor for mel, energy and pitch features.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub pitch_fmin: f32,
    pub pitch_fmax: f32,
    window: Vec<f32>,
    filterbank: Array2<f32>,
}

impl FeatureExtractor {
    pub fn new(config: &DatasetConfig) -> Self {
        let f_max = config.f_max.unwrap_or(config.sample_rate as f32 / 2.0);
        Self {
            sample_rate: config.sample_rate,
            n_fft: config.n_fft,
            win_length: config.win_length,
            hop_length: config.hop_length,
            pitch_fmin: config.pitch_fmin,
            pitch_fmax: config.pitch_fmax,
            window: hann_window(config.win_length),
            filterbank: create_mel_filterbank(
                config.n_fft,
                config.n_mels,
                config.sample_rate as f32,
                config.f_min,
                f_max,
            ),
        }
    }

    pub fn n_mels(&self) -> usize {
        self.filterbank.nrows()
    }

    /// Number of analysis frames for `n_samples` samples.
    pub fn n_frames(&self, n_samples: usize) -> usize {
        if n_samples < self.win_length {
            0
        } else {
            (n_samples - self.win_length) / self.hop_length + 1
        }
    }

    /// Extract all frame-level features.
    pub fn extract(&self, audio: &[f32]) -> Result<Features> {
        if self.n_frames(audio.len()) == 0 {
            return Err(DataError::TooShort {
                samples: audio.len(),
                win_length: self.win_length,
            }
            .into());
        }

        let magnitude = self.stft(audio);
        let log_mel = self
            .filterbank
            .dot(&magnitude)
            .mapv(|x| x.max(LOG_FLOOR).ln());
        let energy = magnitude.map_axis(Axis(0), |col| col.dot(&col).sqrt());

        let (pitch, voiced_mask, p_voiced) = self.pitch(audio);

        Ok(Features {
            log_mel,
            energy,
            pitch,
            voiced_mask,
            p_voiced,
        })
    }

    /// Magnitude spectrogram `(n_fft / 2 + 1, T)`.
    fn stft(&self, audio: &[f32]) -> Array2<f32> {
        let num_frames = self.n_frames(audio.len());
        let freq_bins = self.n_fft / 2 + 1;
        let mut spectrogram = Array2::<f32>::zeros((freq_bins, num_frames));

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.n_fft);

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;

            let mut frame: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.n_fft];
            for i in 0..self.win_length {
                frame[i] = Complex::new(audio[start + i] * self.window[i], 0.0);
            }

            fft.process(&mut frame);

            for k in 0..freq_bins {
                spectrogram[[k, frame_idx]] = frame[k].norm();
            }
        }

        spectrogram
    }

    /// Autocorrelation pitch tracker.
    ///
    /// Returns `(f0, voiced_mask, p_voiced)` per frame.
    fn pitch(&self, audio: &[f32]) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        let num_frames = self.n_frames(audio.len());
        let sr = self.sample_rate as f32;
        let min_lag = ((sr / self.pitch_fmax).floor() as usize).max(1);
        let max_lag = ((sr / self.pitch_fmin).ceil() as usize).min(self.win_length - 1);

        let mut f0 = Array1::zeros(num_frames);
        let mut voiced = Array1::zeros(num_frames);
        let mut p_voiced = Array1::zeros(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;
            let frame = &audio[start..start + self.win_length];

            let rms = (frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32).sqrt();
            if rms < SILENCE_RMS || min_lag >= max_lag {
                continue;
            }

            let corr: Vec<f32> = (min_lag..=max_lag)
                .map(|lag| normalized_autocorrelation(frame, lag))
                .collect();
            let (argmax, best_r) = corr
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            // Shortest period close to the best one, to avoid octave errors
            let peak = (1..corr.len().saturating_sub(1))
                .find(|&i| {
                    corr[i] >= 0.9 * best_r && corr[i] >= corr[i - 1] && corr[i] >= corr[i + 1]
                })
                .unwrap_or(argmax);

            let prob = best_r.clamp(0.0, 1.0);
            p_voiced[frame_idx] = prob;
            if prob > VOICING_THRESHOLD {
                voiced[frame_idx] = 1.0;
                f0[frame_idx] = sr / (min_lag + peak) as f32;
            }
        }

        (f0, voiced, p_voiced)
    }
}

fn normalized_autocorrelation(frame: &[f32], lag: usize) -> f32 {
    let (head, tail) = (&frame[..frame.len() - lag], &frame[lag..]);
    let cross: f32 = head.iter().zip(tail).map(|(a, b)| a * b).sum();
    let e_head: f32 = head.iter().map(|x| x * x).sum();
    let e_tail: f32 = tail.iter().map(|x| x * x).sum();
    let denom = (e_head * e_tail).sqrt();
    if denom > 0.0 { cross / denom } else { 0.0 }
}

/// Create Hann window for STFT.
fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (window_length as f32 - 1.0)).cos())
        .collect()
}

/// Convert frequency in Hz to mel scale.
fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

/// Convert mel scale to frequency in Hz.
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank `(n_mels, n_fft / 2 + 1)` over `[f_min, f_max]`.
fn create_mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: f32,
    f_min: f32,
    f_max: f32,
) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(f_min);
    let max_mel = hz_to_mel(f_max);

    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let freq_bin_width = sample_rate / n_fft as f32;

    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];

        for freq_idx in 0..freq_bins {
            let freq = freq_idx as f32 * freq_bin_width;

            if freq >= left && freq <= center {
                filterbank[[mel_idx, freq_idx]] = (freq - left) / (center - left);
            } else if freq > center && freq <= right {
                filterbank[[mel_idx, freq_idx]] = (right - freq) / (right - center);
            }
        }
    }

    filterbank
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavWriter;

    fn create_test_wav(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        samples: &[f32],
    ) -> hound::Result<()> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in samples {
            writer.write_sample((sample * 32767.0) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn small_config() -> DatasetConfig {
        DatasetConfig {
            sample_rate: 16000,
            n_fft: 512,
            win_length: 512,
            hop_length: 128,
            n_mels: 20,
            f_min: 0.0,
            f_max: None,
            pitch_fmin: 60.0,
            pitch_fmax: 800.0,
            ..DatasetConfig::default()
        }
    }

    fn sine(freq: f32, sample_rate: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn reads_mono() {
        let path = std::env::temp_dir().join("melops_tts_mono.wav");

        let test_samples = vec![0.1, 0.2, 0.3];
        create_test_wav(&path, 22050, 1, &test_samples).unwrap();

        let result = read_audio_mono(&path, 22050).unwrap();

        for (expected, actual) in test_samples.iter().zip(result.iter()) {
            assert!((expected - actual).abs() < 0.01);
        }

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn converts_stereo_to_mono() {
        let path = std::env::temp_dir().join("melops_tts_stereo.wav");

        create_test_wav(&path, 16000, 2, &[0.2, 0.4, 0.6, 0.8]).unwrap();

        let result = read_audio_mono(&path, 16000).unwrap();

        assert_eq!(result.len(), 2);
        assert!((result[0] - 0.3).abs() < 0.01);
        assert!((result[1] - 0.7).abs() < 0.01);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_wrong_sample_rate() {
        let path = std::env::temp_dir().join("melops_tts_44khz.wav");

        create_test_wav(&path, 44100, 1, &[0.0, 0.1]).unwrap();

        let result = read_audio_mono(&path, 22050);

        assert!(matches!(
            result,
            Err(crate::error::Error::Data(DataError::InvalidSampleRate {
                expected: 22050,
                got: 44100
            }))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn feature_shapes_agree() {
        let extractor = FeatureExtractor::new(&small_config());
        let audio = sine(220.0, 16000, 4000);

        let features = extractor.extract(&audio).unwrap();

        let frames = (4000 - 512) / 128 + 1;
        assert_eq!(features.log_mel.dim(), (20, frames));
        assert_eq!(features.n_frames(), frames);
        assert_eq!(features.pitch.len(), frames);
        assert!(features.log_mel.iter().all(|v| v.is_finite()));
        assert!(features.energy.iter().all(|&e| e > 0.0));
    }

    #[test]
    fn tracks_sine_pitch() {
        let extractor = FeatureExtractor::new(&small_config());
        let audio = sine(200.0, 16000, 4000);

        let features = extractor.extract(&audio).unwrap();

        assert!(features.voiced_mask.iter().all(|&v| v == 1.0));
        for &f0 in &features.pitch {
            assert!((f0 - 200.0).abs() < 5.0, "f0 = {f0}");
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        let extractor = FeatureExtractor::new(&small_config());

        let features = extractor.extract(&[0.0; 2048]).unwrap();

        assert!(features.voiced_mask.iter().all(|&v| v == 0.0));
        assert!(features.pitch.iter().all(|&f| f == 0.0));
        assert!(features.log_mel.iter().all(|&v| (v - LOG_FLOOR.ln()).abs() < 1e-6));
    }

    #[test]
    fn short_audio_is_rejected() {
        let extractor = FeatureExtractor::new(&small_config());

        assert!(matches!(
            extractor.extract(&[0.1; 100]),
            Err(crate::error::Error::Data(DataError::TooShort { samples: 100, .. }))
        ));
    }
}
