//! Dataset loading, feature extraction and batching.
//!
//! A [`TtsDataset`] reads a JSON-lines manifest, tokenizes every transcript
//! up front and extracts acoustic features lazily per item. A [`DataLoader`]
//! groups items into padded batches in the fixed tensor order accepted by
//! [`Batch::from_tensors`](crate::types::Batch::from_tensors).

mod collate;
mod manifest;
mod prior;

pub use collate::collate;
pub use manifest::{ManifestEntry, filter_by_duration, read_manifest};
pub use prior::beta_binomial_prior;

use crate::audio::{FeatureExtractor, Features, read_audio_mono};
use crate::config::{DataConfig, DatasetConfig, DataloaderParams};
use crate::error::{DataError, Result};
use crate::traits::{TextNormalizer, TextTokenizer};
use crate::types::Tensor;
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One loaded utterance.
#[derive(Clone, Debug)]
pub struct Sample {
    pub audio: Vec<f32>,
    pub tokens: Vec<i64>,
    pub features: Features,
    /// `(T_mel, T_text)` alignment prior
    pub prior: Array2<f32>,
    pub speaker: i64,
}

/// Manifest-backed text/audio dataset.
pub struct TtsDataset {
    entries: Vec<ManifestEntry>,
    tokens: Vec<Vec<i64>>,
    extractor: FeatureExtractor,
    sample_rate: u32,
    pad_id: i64,
    has_speakers: bool,
}

impl TtsDataset {
    /// Build the dataset described by `config`.
    ///
    /// Returns `Ok(None)` with a warning when no manifest path is configured.
    pub fn from_config(
        config: &DatasetConfig,
        tokenizer: &dyn TextTokenizer,
        normalizer: Option<&dyn TextNormalizer>,
    ) -> Result<Option<Self>> {
        let Some(manifest) = &config.manifest_filepath else {
            tracing::warn!("manifest_filepath was skipped. No dataset for this model.");
            return Ok(None);
        };

        let entries = read_manifest(manifest)?;
        let entries = filter_by_duration(entries, config.min_duration, config.max_duration);
        tracing::info!(manifest = %manifest.display(), items = entries.len(), "loaded manifest");

        Self::new(entries, FeatureExtractor::new(config), tokenizer, normalizer).map(Some)
    }

    pub fn new(
        entries: Vec<ManifestEntry>,
        extractor: FeatureExtractor,
        tokenizer: &dyn TextTokenizer,
        normalizer: Option<&dyn TextNormalizer>,
    ) -> Result<Self> {
        let tokens = entries
            .iter()
            .map(|entry| {
                let text = match (&entry.normalized_text, normalizer) {
                    (Some(text), _) => text.clone(),
                    (None, Some(n)) => n.normalize(&entry.text),
                    (None, None) => entry.text.clone(),
                };
                let ids = tokenizer.encode(&text)?;
                if ids.is_empty() {
                    return Err(DataError::EmptyText(entry.audio_filepath.display().to_string()).into());
                }
                Ok(ids)
            })
            .collect::<Result<Vec<_>>>()?;

        let has_speakers = entries.iter().any(|e| e.speaker.is_some());

        Ok(Self {
            entries,
            tokens,
            sample_rate: extractor.sample_rate,
            extractor,
            pad_id: tokenizer.pad_id(),
            has_speakers,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Load audio and compute features for item `idx`.
    pub fn get(&self, idx: usize) -> Result<Sample> {
        let entry = &self.entries[idx];
        let audio = read_audio_mono(&entry.audio_filepath, self.sample_rate)?;
        let features = self.extractor.extract(&audio)?;
        let tokens = self.tokens[idx].clone();
        let prior = beta_binomial_prior(tokens.len(), features.n_frames(), 1.0);

        Ok(Sample {
            audio,
            tokens,
            features,
            prior,
            speaker: entry.speaker.unwrap_or(0),
        })
    }

    /// Load and collate the items at `indices`.
    pub fn batch(&self, indices: &[usize]) -> Result<Vec<Tensor>> {
        let samples = indices
            .iter()
            .map(|&idx| self.get(idx))
            .collect::<Result<Vec<_>>>()?;
        collate(&samples, self.pad_id, self.has_speakers)
    }
}

/// Batches a dataset with optional seeded shuffling.
pub struct DataLoader {
    dataset: TtsDataset,
    params: DataloaderParams,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: TtsDataset, params: DataloaderParams, seed: u64) -> Self {
        Self {
            dataset,
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build a loader from config, `None` when the dataset has no manifest.
    pub fn from_config(
        config: &DataConfig,
        tokenizer: &dyn TextTokenizer,
        normalizer: Option<&dyn TextNormalizer>,
        seed: u64,
    ) -> Result<Option<Self>> {
        let dataset = TtsDataset::from_config(&config.dataset, tokenizer, normalizer)?;
        Ok(dataset.map(|ds| Self::new(ds, config.dataloader_params.clone(), seed)))
    }

    pub fn dataset(&self) -> &TtsDataset {
        &self.dataset
    }

    /// Batch index groups for one epoch.
    pub fn epoch_indices(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.params.shuffle {
            order.shuffle(&mut self.rng);
        }

        let batch_size = self.params.batch_size.max(1);
        order
            .chunks(batch_size)
            .filter(|chunk| !self.params.drop_last || chunk.len() == batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        let batch_size = self.params.batch_size.max(1);
        if self.params.drop_last {
            self.dataset.len() / batch_size
        } else {
            self.dataset.len().div_ceil(batch_size)
        }
    }

    /// Iterate one epoch of collated batches.
    pub fn epoch(&mut self) -> impl Iterator<Item = Result<Vec<Tensor>>> + '_ {
        let groups = self.epoch_indices();
        let dataset = &self.dataset;
        groups.into_iter().map(move |idx| dataset.batch(&idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::CharTokenizer;
    use std::path::{Path, PathBuf};

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn config(manifest: Option<PathBuf>) -> DatasetConfig {
        DatasetConfig {
            manifest_filepath: manifest,
            sample_rate: 8000,
            n_fft: 256,
            win_length: 256,
            hop_length: 64,
            n_mels: 8,
            f_max: None,
            pitch_fmin: 80.0,
            pitch_fmax: 1000.0,
            ..DatasetConfig::default()
        }
    }

    fn fixture(name: &str, n: usize) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let mut lines = String::new();
        for i in 0..n {
            let wav = format!("{i}.wav");
            let samples: Vec<f32> = (0..1000 + 200 * i)
                .map(|t| 0.3 * (t as f32 * 0.2).sin())
                .collect();
            write_wav(&dir.join(&wav), &samples, 8000);
            lines.push_str(&format!(
                "{{\"audio_filepath\": \"{wav}\", \"text\": \"ab{}\"}}\n",
                "a".repeat(i)
            ));
        }
        let manifest = dir.join("manifest.jsonl");
        std::fs::write(&manifest, lines).unwrap();
        manifest
    }

    #[test]
    fn missing_manifest_yields_no_dataset() {
        let tok = CharTokenizer::new("ab", "").unwrap();

        let ds = TtsDataset::from_config(&config(None), &tok, None).unwrap();

        assert!(ds.is_none());
    }

    #[test]
    fn loads_and_batches() {
        let manifest = fixture("melops_tts_dataset_batches", 3);
        let tok = CharTokenizer::new("ab", "").unwrap();
        let ds = TtsDataset::from_config(&config(Some(manifest.clone())), &tok, None)
            .unwrap()
            .unwrap();
        assert_eq!(ds.len(), 3);

        let params = DataloaderParams {
            batch_size: 2,
            shuffle: false,
            drop_last: false,
        };
        let mut loader = DataLoader::new(ds, params, 0);
        assert_eq!(loader.num_batches(), 2);

        let batches: Vec<_> = loader.epoch().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);

        let batch = crate::types::Batch::from_tensors(batches[0].clone()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.text_lens.to_vec(), [2, 3]);
        assert_eq!(batch.log_mel.shape()[1], 8);
        let longest = batch.log_mel_lens[1] as usize;
        assert_eq!(batch.align_prior_matrix.shape()[1], longest);

        std::fs::remove_dir_all(manifest.parent().unwrap()).ok();
    }

    #[test]
    fn shuffle_is_seeded() {
        let manifest = fixture("melops_tts_dataset_shuffle", 6);
        let tok = CharTokenizer::new("ab", "").unwrap();
        let params = DataloaderParams {
            batch_size: 4,
            shuffle: true,
            drop_last: true,
        };
        let load = || {
            let ds = TtsDataset::from_config(&config(Some(manifest.clone())), &tok, None)
                .unwrap()
                .unwrap();
            DataLoader::new(ds, params.clone(), 7)
        };

        let (mut a, mut b) = (load(), load());
        let first = a.epoch_indices();

        assert_eq!(first, b.epoch_indices());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].len(), 4);

        std::fs::remove_dir_all(manifest.parent().unwrap()).ok();
    }
}
