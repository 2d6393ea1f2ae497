//! Core types for melops-tts

use crate::error::{ConfigError, ModelError, Result};
use hf_hub::CacheRepo;
use hf_hub::api::sync::ApiRepo;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Dimension, Ix1, Ix2, Ix3, Ix4};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Minimum number of tensors in a collated batch (speaker id is optional).
pub const BATCH_ARITY: usize = 13;

/// Dynamically typed tensor as produced by the collate function.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    Float(ArrayD<f32>),
    Int(ArrayD<i64>),
}

impl Tensor {
    fn into_float<D: Dimension>(self, field: &'static str) -> Result<ndarray::Array<f32, D>> {
        match self {
            Tensor::Float(a) => Ok(a.into_dimensionality::<D>()?),
            Tensor::Int(_) => Err(ModelError::BatchDtype {
                field,
                expected: "f32",
            }
            .into()),
        }
    }

    fn into_int<D: Dimension>(self, field: &'static str) -> Result<ndarray::Array<i64, D>> {
        match self {
            Tensor::Int(a) => Ok(a.into_dimensionality::<D>()?),
            Tensor::Float(_) => Err(ModelError::BatchDtype {
                field,
                expected: "i64",
            }
            .into()),
        }
    }
}

impl<D: Dimension> From<ndarray::Array<f32, D>> for Tensor {
    fn from(a: ndarray::Array<f32, D>) -> Self {
        Tensor::Float(a.into_dyn())
    }
}

impl<D: Dimension> From<ndarray::Array<i64, D>> for Tensor {
    fn from(a: ndarray::Array<i64, D>) -> Self {
        Tensor::Int(a.into_dyn())
    }
}

/// Named view of one collated mini-batch.
///
/// Shapes follow the collate order: audio `(B, samples)`, text `(B, T_text)`,
/// log_mel `(B, n_mel, T_mel)`, align_prior_matrix `(B, T_mel, T_text)`,
/// pitch/voiced_mask/p_voiced/energy `(B, T_mel)`, all lengths `(B,)`.
#[derive(Clone, Debug)]
pub struct Batch {
    pub audio: Array2<f32>,
    pub audio_lens: Array1<i64>,
    pub text: Array2<i64>,
    pub text_lens: Array1<i64>,
    pub log_mel: Array3<f32>,
    pub log_mel_lens: Array1<i64>,
    pub align_prior_matrix: Array3<f32>,
    pub pitch: Array2<f32>,
    pub pitch_lens: Array1<i64>,
    pub voiced_mask: Array2<f32>,
    pub p_voiced: Array2<f32>,
    pub energy: Array2<f32>,
    pub energy_lens: Array1<i64>,
    pub speaker_id: Array1<i64>,
}

impl Batch {
    /// Map a fixed-position tensor sequence to named fields.
    ///
    /// With only 13 tensors the speaker id is synthesized as a zero vector
    /// sized to the batch dimension of `text_lens`. A 14th tensor is passed
    /// through unchanged; anything past it is ignored.
    pub fn from_tensors(tensors: Vec<Tensor>) -> Result<Self> {
        if tensors.len() < BATCH_ARITY {
            return Err(ModelError::BatchArity {
                got: tensors.len(),
                min: BATCH_ARITY,
            }
            .into());
        }

        let mut it = tensors.into_iter();
        let mut next = || it.next().ok_or(ModelError::BatchArity { got: 0, min: BATCH_ARITY });

        let audio = next()?.into_float::<Ix2>("audio")?;
        let audio_lens = next()?.into_int::<Ix1>("audio_lens")?;
        let text = next()?.into_int::<Ix2>("text")?;
        let text_lens = next()?.into_int::<Ix1>("text_lens")?;
        let log_mel = next()?.into_float::<Ix3>("log_mel")?;
        let log_mel_lens = next()?.into_int::<Ix1>("log_mel_lens")?;
        let align_prior_matrix = next()?.into_float::<Ix3>("align_prior_matrix")?;
        let pitch = next()?.into_float::<Ix2>("pitch")?;
        let pitch_lens = next()?.into_int::<Ix1>("pitch_lens")?;
        let voiced_mask = next()?.into_float::<Ix2>("voiced_mask")?;
        let p_voiced = next()?.into_float::<Ix2>("p_voiced")?;
        let energy = next()?.into_float::<Ix2>("energy")?;
        let energy_lens = next()?.into_int::<Ix1>("energy_lens")?;

        let speaker_id = match next() {
            Ok(t) => t.into_int::<Ix1>("speaker_id")?,
            Err(_) => Array1::zeros(text_lens.len()),
        };

        Ok(Self {
            audio,
            audio_lens,
            text,
            text_lens,
            log_mel,
            log_mel_lens,
            align_prior_matrix,
            pitch,
            pitch_lens,
            voiced_mask,
            p_voiced,
            energy,
            energy_lens,
            speaker_id,
        })
    }

    /// Number of utterances in the batch.
    pub fn len(&self) -> usize {
        self.text_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text_lens.is_empty()
    }
}

/// Named output tensors of a synthesis network.
///
/// The wrapper reads only [`ModelOutputs::ATTN`], [`ModelOutputs::ATTN_SOFT`]
/// and [`ModelOutputs::MEL`]; everything else is for the loss module.
#[derive(Clone, Debug, Default)]
pub struct ModelOutputs {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ModelOutputs {
    pub const ATTN: &'static str = "attn";
    pub const ATTN_SOFT: &'static str = "attn_soft";
    pub const MEL: &'static str = "mel";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<D: Dimension>(&mut self, name: impl Into<String>, value: ndarray::Array<f32, D>) {
        self.tensors.insert(name.into(), value.into_dyn());
    }

    /// Builder-style insert.
    pub fn with<D: Dimension>(mut self, name: impl Into<String>, value: ndarray::Array<f32, D>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.tensors.get(name).ok_or_else(|| {
            ModelError::MissingOutput {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn remove(&mut self, name: &str) -> Result<ArrayD<f32>> {
        self.tensors.remove(name).ok_or_else(|| {
            ModelError::MissingOutput {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Hard attention `(B, 1, T_mel, T_text)`.
    pub fn attn(&self) -> Result<Array4<f32>> {
        Ok(self.get(Self::ATTN)?.clone().into_dimensionality::<Ix4>()?)
    }

    /// Soft attention `(B, 1, T_mel, T_text)`.
    pub fn attn_soft(&self) -> Result<Array4<f32>> {
        Ok(self.get(Self::ATTN_SOFT)?.clone().into_dimensionality::<Ix4>()?)
    }

    /// Mel-spectrogram `(B, n_mel, T_mel)`.
    pub fn mel(&self) -> Result<Array3<f32>> {
        Ok(self.get(Self::MEL)?.clone().into_dimensionality::<Ix3>()?)
    }
}

/// Model repository sources for tokenizer and checkpoint files.
#[derive(Debug)]
pub enum ModelRepo {
    /// Local filesystem path
    Path(PathBuf),
    /// HuggingFace cache repository
    Cache(CacheRepo),
    /// HuggingFace API repository
    Api(ApiRepo),
}

impl ModelRepo {
    /// Resolve a file name to its full path in this repository.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        match self {
            ModelRepo::Path(path) => path
                .join(file_name)
                .canonicalize()
                .map_err(|_| ConfigError::NotFound(file_name.to_string()).into()),
            ModelRepo::Cache(cache_repo) => cache_repo
                .get(file_name)
                .ok_or_else(|| ConfigError::NotFound(file_name.to_string()).into()),
            ModelRepo::Api(api_repo) => Ok(api_repo.get(file_name).map_err(ConfigError::Hub)?),
        }
    }

    /// Try resolving multiple file names, return first successful match.
    pub fn resolve_any(&self, candidates: &[&str]) -> Result<PathBuf> {
        candidates
            .iter()
            .find_map(|name| self.resolve(name).ok())
            .ok_or_else(|| ConfigError::NotFound(candidates.join(", ")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    fn thirteen_tensors(batch: usize) -> Vec<Tensor> {
        let t_text = 4;
        let t_mel = 6;
        let n_mel = 3;
        vec![
            Array2::<f32>::zeros((batch, 256)).into(),
            Array1::<i64>::from_elem(batch, 256).into(),
            Array2::<i64>::ones((batch, t_text)).into(),
            Array1::<i64>::from_elem(batch, t_text as i64).into(),
            Array3::<f32>::zeros((batch, n_mel, t_mel)).into(),
            Array1::<i64>::from_elem(batch, t_mel as i64).into(),
            Array3::<f32>::ones((batch, t_mel, t_text)).into(),
            Array2::<f32>::zeros((batch, t_mel)).into(),
            Array1::<i64>::from_elem(batch, t_mel as i64).into(),
            Array2::<f32>::zeros((batch, t_mel)).into(),
            Array2::<f32>::zeros((batch, t_mel)).into(),
            Array2::<f32>::zeros((batch, t_mel)).into(),
            Array1::<i64>::from_elem(batch, t_mel as i64).into(),
        ]
    }

    #[test]
    fn synthesizes_zero_speaker_ids() {
        let batch = Batch::from_tensors(thirteen_tensors(3)).unwrap();

        assert_eq!(batch.speaker_id.len(), batch.text_lens.len());
        assert!(batch.speaker_id.iter().all(|&s| s == 0));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn passes_speaker_ids_through() {
        let mut tensors = thirteen_tensors(2);
        tensors.push(array![4_i64, 7].into());

        let batch = Batch::from_tensors(tensors).unwrap();

        assert_eq!(batch.speaker_id, array![4_i64, 7]);
    }

    #[test]
    fn rejects_short_batches() {
        let mut tensors = thirteen_tensors(1);
        tensors.truncate(12);

        let err = Batch::from_tensors(tensors).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Model(ModelError::BatchArity { got: 12, min: 13 })
        ));
    }

    #[test]
    fn rejects_wrong_dtype() {
        let mut tensors = thirteen_tensors(1);
        tensors[2] = Array::<f32, _>::zeros((1, 4)).into();

        let err = Batch::from_tensors(tensors).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Model(ModelError::BatchDtype { field: "text", .. })
        ));
    }

    #[test]
    fn missing_output_is_reported_by_name() {
        let outputs = ModelOutputs::new().with("mel", Array3::<f32>::zeros((1, 2, 3)));

        assert!(outputs.mel().is_ok());
        match outputs.attn() {
            Err(crate::error::Error::Model(ModelError::MissingOutput { name })) => {
                assert_eq!(name, "attn")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
