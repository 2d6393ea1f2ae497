//! Error types for melops-tts organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Training/inference error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dataset loading stage error
    #[error(transparent)]
    Data(#[from] DataError),

    /// Model forward/backward stage error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Tokenizer error
    #[error(transparent)]
    Tokenizers(tokenizers::Error),

    /// Metrics or checkpoint output error
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Configuration errors (optimizer, loss weights, tokenizer setup).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Optimizer name not recognized
    #[error("unrecognized optimizer {0}!")]
    UnsupportedOptimizer(String),

    /// Every loss term has a non-positive weight
    #[error("no loss term has a positive weight ({terms} terms)")]
    NoPositiveLossWeight { terms: usize },

    /// Invalid value for a config field
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Tokenizer could not be built from config
    #[error("tokenizer setup failed: {0}")]
    Tokenizer(String),

    /// Model or tokenizer file not found
    #[error("file not found: {0}")]
    NotFound(String),

    /// YAML parse error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HuggingFace hub error
    #[error(transparent)]
    Hub(#[from] hf_hub::api::sync::ApiError),
}

/// Dataset loading and feature extraction errors.
#[derive(Debug, Error)]
pub enum DataError {
    /// Malformed manifest line
    #[error("manifest line {line}: {source}")]
    Manifest {
        line: usize,
        source: serde_json::Error,
    },

    /// Sample rate validation failed
    #[error("invalid sample rate: expected {expected}Hz, got {got}Hz")]
    InvalidSampleRate { expected: u32, got: u32 },

    /// Channel count validation failed
    #[error("invalid channel count: expected mono or stereo, got {0} channels")]
    InvalidChannels(u16),

    /// Audio too short to produce a single analysis frame
    #[error("audio too short: {samples} samples (window {win_length})")]
    TooShort { samples: usize, win_length: usize },

    /// Empty transcript after tokenization
    #[error("empty token sequence for {0}")]
    EmptyText(String),

    /// Collate called without samples
    #[error("empty batch")]
    EmptyBatch,

    /// IO error during manifest or audio loading
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),
}

/// Model errors (batch adaptation, network outputs, ndarray operations).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing expected output tensor
    #[error("missing model output: {name}")]
    MissingOutput { name: String },

    /// Batch tuple is shorter than the fixed layout
    #[error("batch has {got} tensors, expected at least {min}")]
    BatchArity { got: usize, min: usize },

    /// Tensor at a batch position has the wrong element type
    #[error("batch field {field}: expected {expected} tensor")]
    BatchDtype {
        field: &'static str,
        expected: &'static str,
    },

    /// Unknown parameter name
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Token id outside the embedding table
    #[error("token id {id} out of range (vocab {vocab})")]
    TokenOutOfRange { id: i64, vocab: usize },

    /// Speaker id outside the speaker table
    #[error("speaker id {id} out of range ({n_speakers} speakers)")]
    SpeakerOutOfRange { id: i64, n_speakers: usize },

    /// Backward called without a cached forward pass
    #[error("backward called before forward")]
    NoForwardCache,

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Metrics sink and checkpoint errors.
#[derive(Debug, Error)]
pub enum OutputError {
    /// IO error while writing
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// Image buffer size does not match its dimensions
    #[error("image buffer of {len} bytes does not fit {width}x{height}")]
    ImageBuffer { len: usize, width: u32, height: u32 },
}

/// Result type alias for melops-tts operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// hound::Error → DataError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Data(DataError::Hound(e))
    }
}

// std::io::Error → DataError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Data(DataError::Io(e))
    }
}

// ShapeError → ModelError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Model(ModelError::Shape(e))
    }
}

// MinMaxError → ModelError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Model(ModelError::MinMax(e))
    }
}

// serde_yaml::Error → ConfigError → Error
impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(ConfigError::Yaml(e))
    }
}

// serde_json::Error → OutputError → Error
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Output(OutputError::Json(e))
    }
}

// image::ImageError → OutputError → Error
impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Output(OutputError::Image(e))
    }
}

// tokenizers::Error → Error
impl From<tokenizers::Error> for Error {
    fn from(e: tokenizers::Error) -> Self {
        Error::Tokenizers(e)
    }
}
