//! Text frontend: tokenizers and normalizers built from config.

use crate::config::{ModelSource, NormalizerCallKwargs, NormalizerConfig, TokenizerConfig};
use crate::error::{ConfigError, Result};
use crate::traits::{TextNormalizer, TextTokenizer};
use crate::types::ModelRepo;
use hf_hub::Cache;
use hf_hub::api::sync::Api;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

pub const PAD_ID: i64 = 0;
pub const OOV_ID: i64 = 1;
const SPACE_ID: i64 = 2;

/// Build the tokenizer described by `config`.
pub fn build_tokenizer(config: &TokenizerConfig) -> Result<Box<dyn TextTokenizer>> {
    match config {
        TokenizerConfig::Chars { symbols, punct } => {
            Ok(Box::new(CharTokenizer::new(symbols, punct)?))
        }
        TokenizerConfig::HuggingFace {
            model_id,
            model_source,
            pad_id,
        } => {
            let repo = resolve_repo(model_id, *model_source)?;
            Ok(Box::new(HfTokenizer::from_repo(&repo, *pad_id)?))
        }
    }
}

/// Build the optional normalizer described by `config`.
pub fn build_normalizer(
    config: Option<&NormalizerConfig>,
    kwargs: &NormalizerCallKwargs,
) -> Result<Option<Box<dyn TextNormalizer>>> {
    let Some(config) = config else {
        return Ok(None);
    };
    match config {
        NormalizerConfig::Basic { whitelist } => {
            let normalizer = match whitelist {
                Some(path) => BasicNormalizer::from_whitelist(path, kwargs.clone())?,
                None => BasicNormalizer::new(kwargs.clone()),
            };
            Ok(Some(Box::new(normalizer)))
        }
    }
}

fn resolve_repo(model_id: &str, source: ModelSource) -> Result<ModelRepo> {
    let repo = match source {
        ModelSource::Auto => {
            let path = PathBuf::from(model_id);
            if path.is_dir() {
                ModelRepo::Path(path)
            } else {
                let api = Api::new().map_err(ConfigError::Hub)?;
                ModelRepo::Api(api.model(model_id.to_string()))
            }
        }
        ModelSource::Path => ModelRepo::Path(PathBuf::from(model_id)),
        ModelSource::Cache => ModelRepo::Cache(Cache::from_env().model(model_id.to_string())),
        ModelSource::Api => {
            ModelRepo::Api(Api::new().map_err(ConfigError::Hub)?.model(model_id.to_string()))
        }
    };
    Ok(repo)
}

/// Character-level tokenizer.
///
/// Ids: 0 padding, 1 out-of-vocabulary, 2 space, then `symbols` and
/// `punct` in order. Repeated characters keep their first id.
#[derive(Clone, Debug)]
pub struct CharTokenizer {
    vocab: HashMap<char, i64>,
    size: usize,
}

impl CharTokenizer {
    pub fn new(symbols: &str, punct: &str) -> Result<Self> {
        if symbols.is_empty() {
            return Err(ConfigError::Tokenizer("empty symbol set".to_string()).into());
        }

        let mut vocab = HashMap::new();
        vocab.insert(' ', SPACE_ID);
        let mut next = SPACE_ID + 1;
        for c in symbols.chars().chain(punct.chars()) {
            vocab.entry(c).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            });
        }

        Ok(Self {
            vocab,
            size: next as usize,
        })
    }
}

impl TextTokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        Ok(text
            .chars()
            .map(|c| {
                let c = if c.is_whitespace() { ' ' } else { c };
                self.vocab.get(&c).copied().unwrap_or(OOV_ID)
            })
            .collect())
    }

    fn pad_id(&self) -> i64 {
        PAD_ID
    }

    fn vocab_size(&self) -> usize {
        self.size
    }
}

/// Wrapper around a HuggingFace `tokenizer.json`.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    pad_id: i64,
}

impl HfTokenizer {
    pub fn new(tokenizer: Tokenizer, pad_id: i64) -> Self {
        Self { tokenizer, pad_id }
    }

    pub fn from_repo(repo: &ModelRepo, pad_id: i64) -> Result<Self> {
        let path = repo.resolve("tokenizer.json")?;
        tracing::debug!(path = %path.display(), "loading tokenizer");
        Ok(Self::new(Tokenizer::from_file(&path)?, pad_id))
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self.tokenizer.encode(text, false)?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    fn pad_id(&self) -> i64 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

/// Whitespace collapsing, whitelist replacement and optional lowercasing.
#[derive(Clone, Debug, Default)]
pub struct BasicNormalizer {
    whitelist: HashMap<String, String>,
    kwargs: NormalizerCallKwargs,
}

impl BasicNormalizer {
    pub fn new(kwargs: NormalizerCallKwargs) -> Self {
        Self {
            whitelist: HashMap::new(),
            kwargs,
        }
    }

    /// Load `written<TAB>spoken` pairs, one per line. Blank lines and lines
    /// starting with `#` are ignored.
    pub fn from_whitelist(path: impl AsRef<Path>, kwargs: NormalizerCallKwargs) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut whitelist = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (written, spoken) = line.split_once('\t').ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "text_normalizer.whitelist",
                    reason: format!("{}:{} has no tab separator", path.display(), idx + 1),
                }
            })?;
            whitelist.insert(written.to_string(), spoken.to_string());
        }

        tracing::info!(path = %path.display(), entries = whitelist.len(), "loaded normalizer whitelist");
        Ok(Self { whitelist, kwargs })
    }
}

impl TextNormalizer for BasicNormalizer {
    fn normalize(&self, text: &str) -> String {
        let normalized = text
            .split_whitespace()
            .map(|word| self.whitelist.get(word).map_or(word, String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let normalized = if self.kwargs.lowercase {
            normalized.to_lowercase()
        } else {
            normalized
        };

        if self.kwargs.verbose {
            tracing::debug!(input = text, output = %normalized, "normalized text");
        }
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_ids_are_stable() {
        let tok = CharTokenizer::new("abca", "!").unwrap();

        assert_eq!(tok.encode("ab c!").unwrap(), vec![3, 4, 2, 5, 6]);
        assert_eq!(tok.vocab_size(), 7);
        assert_eq!(tok.pad_id(), PAD_ID);
    }

    #[test]
    fn unknown_chars_map_to_oov() {
        let tok = CharTokenizer::new("ab", "").unwrap();

        assert_eq!(tok.encode("az\tb").unwrap(), vec![3, OOV_ID, 2, 4]);
    }

    #[test]
    fn empty_symbols_rejected() {
        assert!(CharTokenizer::new("", ".").is_err());
    }

    #[test]
    fn normalizer_collapses_and_lowercases() {
        let n = BasicNormalizer::new(NormalizerCallKwargs::default());

        assert_eq!(n.normalize("  Hello\n  World "), "hello world");
    }

    #[test]
    fn normalizer_keeps_case_when_asked() {
        let kwargs = NormalizerCallKwargs {
            lowercase: false,
            verbose: true,
        };
        let n = BasicNormalizer::new(kwargs);

        assert_eq!(n.normalize("Hello  World"), "Hello World");
    }

    #[test]
    fn whitelist_replaces_whole_words() {
        let path = std::env::temp_dir().join("melops_tts_whitelist.tsv");
        std::fs::write(&path, "# comment\nDr.\tdoctor\nSt.\tstreet\n\n").unwrap();

        let n = BasicNormalizer::from_whitelist(&path, NormalizerCallKwargs::default()).unwrap();

        assert_eq!(n.normalize("Dr. Smith on Main St."), "doctor smith on main street");
        assert_eq!(n.normalize("Drs. Smith"), "drs. smith");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn whitelist_without_tab_is_rejected() {
        let path = std::env::temp_dir().join("melops_tts_bad_whitelist.tsv");
        std::fs::write(&path, "Dr. doctor\n").unwrap();

        assert!(BasicNormalizer::from_whitelist(&path, NormalizerCallKwargs::default()).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn builds_from_config() {
        let config = TokenizerConfig::default();
        let tok = build_tokenizer(&config).unwrap();
        assert_eq!(tok.encode("a").unwrap(), vec![3]);

        let kwargs = NormalizerCallKwargs::default();
        assert!(build_normalizer(None, &kwargs).unwrap().is_none());
        let n = build_normalizer(Some(&NormalizerConfig::Basic { whitelist: None }), &kwargs)
            .unwrap()
            .unwrap();
        assert_eq!(n.normalize("A  B"), "a b");
    }
}
