//! JSON-lines dataset manifests.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One utterance of a manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub audio_filepath: PathBuf,
    pub text: String,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f32>,
    #[serde(default)]
    pub speaker: Option<i64>,
    /// Pre-normalized text, used instead of normalizing `text`
    #[serde(default)]
    pub normalized_text: Option<String>,
}

/// Read a manifest with one JSON object per line.
///
/// Relative audio paths are resolved against the manifest's directory.
/// Blank lines are skipped.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let mut entry: ManifestEntry = serde_json::from_str(line).map_err(|source| {
                DataError::Manifest {
                    line: idx + 1,
                    source,
                }
            })?;
            if entry.audio_filepath.is_relative() {
                entry.audio_filepath = base.join(&entry.audio_filepath);
            }
            Ok(entry)
        })
        .collect()
}

/// Keep entries whose duration lies within the optional bounds.
///
/// Entries without a duration are kept.
pub fn filter_by_duration(
    entries: Vec<ManifestEntry>,
    min_duration: Option<f32>,
    max_duration: Option<f32>,
) -> Vec<ManifestEntry> {
    let before = entries.len();
    let kept: Vec<_> = entries
        .into_iter()
        .filter(|e| match e.duration {
            Some(d) => min_duration.is_none_or(|min| d >= min) && max_duration.is_none_or(|max| d <= max),
            None => true,
        })
        .collect();

    if kept.len() < before {
        tracing::info!(
            kept = kept.len(),
            pruned = before - kept.len(),
            "filtered manifest by duration"
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_entries_and_resolves_paths() {
        let dir = std::env::temp_dir().join("melops_tts_manifest");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("train.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"audio_filepath": "a.wav", "text": "hello", "duration": 1.5}"#,
                "\n\n",
                r#"{"audio_filepath": "/abs/b.wav", "text": "world", "speaker": 3}"#,
                "\n",
            ),
        )
        .unwrap();

        let entries = read_manifest(&path).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].audio_filepath, dir.join("a.wav"));
        assert_eq!(entries[0].duration, Some(1.5));
        assert_eq!(entries[1].audio_filepath, PathBuf::from("/abs/b.wav"));
        assert_eq!(entries[1].speaker, Some(3));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn reports_bad_line_number() {
        let path = std::env::temp_dir().join("melops_tts_bad_manifest.jsonl");
        std::fs::write(&path, "{\"audio_filepath\": \"a.wav\", \"text\": \"x\"}\nnot json\n").unwrap();

        let err = read_manifest(&path).unwrap_err();

        assert!(matches!(
            err,
            crate::error::Error::Data(DataError::Manifest { line: 2, .. })
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn filters_by_duration() {
        let entry = |d: Option<f32>| ManifestEntry {
            audio_filepath: PathBuf::from("x.wav"),
            text: "x".into(),
            duration: d,
            speaker: None,
            normalized_text: None,
        };
        let entries = vec![entry(Some(0.5)), entry(Some(2.0)), entry(Some(20.0)), entry(None)];

        let kept = filter_by_duration(entries, Some(1.0), Some(10.0));

        let durations: Vec<_> = kept.iter().map(|e| e.duration).collect();
        assert_eq!(durations, [Some(2.0), None]);
    }
}
