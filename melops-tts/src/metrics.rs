//! Metrics sinks.

use crate::error::{OutputError, Result};
use crate::plot::image_to_hwc;
use crate::traits::MetricsSink;
use image::RgbImage;
use ndarray::Array3;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Emits every metric as a structured `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log_scalar(&mut self, name: &str, value: f32, step: u64) -> Result<()> {
        tracing::info!(target: "metrics", name, value, step);
        Ok(())
    }

    fn log_image(&mut self, tag: &str, image: &RgbImage, step: u64) -> Result<()> {
        let (width, height) = image.dimensions();
        tracing::info!(target: "metrics", tag, width, height, step, "image");
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    step: u64,
    name: &'a str,
    value: f32,
}

/// Writes scalars as JSON lines to `scalars.jsonl` and images as PNG files
/// under `images/` in a log directory.
pub struct FileSink {
    dir: PathBuf,
    scalars: BufWriter<File>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("images")).map_err(OutputError::Io)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("scalars.jsonl"))
            .map_err(OutputError::Io)?;

        tracing::info!(dir = %dir.display(), "logging metrics to files");
        Ok(Self {
            dir,
            scalars: BufWriter::new(file),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an image with `tag` at `step` is written to.
    pub fn image_path(&self, tag: &str, step: u64) -> PathBuf {
        let tag = tag.replace('/', "_");
        self.dir.join("images").join(format!("{tag}_{step:08}.png"))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalars.flush().map_err(OutputError::Io)?;
        Ok(())
    }
}

impl MetricsSink for FileSink {
    fn log_scalar(&mut self, name: &str, value: f32, step: u64) -> Result<()> {
        serde_json::to_writer(&mut self.scalars, &ScalarRecord { step, name, value })?;
        self.scalars.write_all(b"\n").map_err(OutputError::Io)?;
        Ok(())
    }

    fn log_image(&mut self, tag: &str, image: &RgbImage, step: u64) -> Result<()> {
        let path = self.image_path(tag, step);
        image.save(&path)?;
        tracing::debug!(path = %path.display(), "saved image");
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.scalars.flush() {
            tracing::warn!(error = %e, "failed to flush scalars");
        }
    }
}

/// Keeps every metric in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub scalars: Vec<(String, f32, u64)>,
    /// Images as `(tag, HWC array, step)`
    pub images: Vec<(String, Array3<u8>, u64)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value logged under `name`.
    pub fn scalar(&self, name: &str) -> Option<f32> {
        self.scalars
            .iter()
            .rev()
            .find(|(n, _, _)| n == name)
            .map(|(_, v, _)| *v)
    }

    pub fn scalar_names(&self) -> Vec<&str> {
        self.scalars.iter().map(|(n, _, _)| n.as_str()).collect()
    }

    pub fn image_tags(&self) -> Vec<&str> {
        self.images.iter().map(|(t, _, _)| t.as_str()).collect()
    }
}

impl MetricsSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f32, step: u64) -> Result<()> {
        self.scalars.push((name.to_string(), value, step));
        Ok(())
    }

    fn log_image(&mut self, tag: &str, image: &RgbImage, step: u64) -> Result<()> {
        self.images.push((tag.to_string(), image_to_hwc(image)?, step));
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn log_scalar(&mut self, name: &str, value: f32, step: u64) -> Result<()> {
        (**self).log_scalar(name, value, step)
    }

    fn log_image(&mut self, tag: &str, image: &RgbImage, step: u64) -> Result<()> {
        (**self).log_image(tag, image, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        sink.log_scalar("train/loss", 2.0, 1).unwrap();
        sink.log_scalar("train/loss", 1.0, 2).unwrap();
        sink.log_image("attn", &RgbImage::new(3, 2), 2).unwrap();

        assert_eq!(sink.scalar("train/loss"), Some(1.0));
        assert_eq!(sink.scalar("missing"), None);
        assert_eq!(sink.images[0].1.dim(), (2, 3, 3));
    }

    #[test]
    fn file_sink_writes_jsonl_and_png() {
        let dir = std::env::temp_dir().join("melops_tts_file_sink");
        std::fs::remove_dir_all(&dir).ok();

        let mut sink = FileSink::new(&dir).unwrap();
        sink.log_scalar("val/loss_mel", 0.5, 10).unwrap();
        sink.log_image("val/attention", &RgbImage::new(4, 4), 10).unwrap();
        sink.flush().unwrap();

        let lines = std::fs::read_to_string(dir.join("scalars.jsonl")).unwrap();
        let record: serde_json::Value = serde_json::from_str(lines.trim()).unwrap();
        assert_eq!(record["name"], "val/loss_mel");
        assert_eq!(record["step"], 10);
        assert!(sink.image_path("val/attention", 10).exists());

        drop(sink);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn tracing_sink_accepts_everything() {
        let mut sink = TracingSink;

        sink.log_scalar("x", 1.0, 0).unwrap();
        sink.log_image("y", &RgbImage::new(1, 1), 0).unwrap();
    }
}
