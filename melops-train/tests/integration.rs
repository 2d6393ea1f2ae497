//! Integration tests for the mel-train CLI.

use clap::Parser;
use melops_train::cli::{Cli, is_fatal_config_error, run_cli};
use std::path::{Path, PathBuf};
use std::process::Command;

fn write_wav(path: &Path, freq: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for t in 0..1600 {
        let v = 0.4 * (2.0 * std::f32::consts::PI * freq * t as f32 / 8000.0).sin();
        writer.write_sample((v * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write audio, a manifest and a config into a fresh temp dir.
fn fixture(name: &str, optimizer: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();

    let mut manifest = String::new();
    for (i, text) in ["ab", "ba", "aab"].iter().enumerate() {
        write_wav(&dir.join(format!("{i}.wav")), 200.0 + 40.0 * i as f32);
        manifest.push_str(&format!("{{\"audio_filepath\": \"{i}.wav\", \"text\": \"{text}\"}}\n"));
    }
    std::fs::write(dir.join("manifest.jsonl"), manifest).unwrap();

    let config = format!(
        r#"
model:
  n_mel_channels: 8
train:
  max_steps: 4
  val_every_n_steps: 2
  log_every_n_steps: 1
  binarization_start_iter: 1
  kl_loss_start_iter: 2
  checkpoint_dir: {checkpoints}
optim:
  name: {optimizer}
  lr: 0.01
text_tokenizer:
  type: chars
  symbols: ab
text_normalizer:
  type: basic
train_ds:
  dataset:
    manifest_filepath: {manifest}
    sample_rate: 8000
    n_fft: 256
    win_length: 256
    hop_length: 64
    n_mels: 8
    f_max: null
    pitch_fmin: 80.0
    pitch_fmax: 1000.0
  dataloader_params:
    batch_size: 2
"#,
        checkpoints = dir.join("checkpoints").display(),
        manifest = dir.join("manifest.jsonl").display(),
    );
    std::fs::write(dir.join("radtts.yaml"), config).unwrap();
    dir
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn train_writes_checkpoints_and_metrics() {
    let dir = fixture("melops_train_cli_train", "RAdam");
    let config = dir.join("radtts.yaml");
    let logs = dir.join("logs");

    let cli = Cli::parse_from([
        "mel-train",
        "train",
        "-c",
        arg(&config),
        "--log-dir",
        arg(&logs),
    ]);
    run_cli(cli).expect("training failed");

    assert!(dir.join("checkpoints/checkpoint-00000004.json").exists());
    let scalars = std::fs::read_to_string(logs.join("scalars.jsonl")).unwrap();
    assert!(scalars.contains("\"train/loss_mel\""));
    assert!(scalars.lines().count() > 4);

    // Synthesize from the trained parameters
    let mel = dir.join("mel.json");
    let image = dir.join("mel.png");
    let cli = Cli::parse_from([
        "mel-train",
        "synth",
        "-c",
        arg(&config),
        "AB",
        "--normalize",
        "--checkpoint",
        arg(&dir.join("checkpoints/checkpoint-00000004.json")),
        "-o",
        arg(&mel),
        "--image",
        arg(&image),
    ]);
    run_cli(cli).expect("synthesis failed");

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&mel).unwrap()).unwrap();
    assert_eq!(json["dim"][0], 1);
    assert_eq!(json["dim"][1], 8);
    assert!(image.exists());

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn parse_uses_configured_frontend() {
    let dir = fixture("melops_train_cli_parse", "Adam");
    let cli = Cli::parse_from([
        "mel-train",
        "parse",
        "-c",
        arg(&dir.join("radtts.yaml")),
        "BA  a",
        "--normalize",
    ]);

    run_cli(cli).expect("parse failed");

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn unsupported_optimizer_is_reported_as_fatal() {
    let dir = fixture("melops_train_cli_sgd", "SGD");
    let cli = Cli::parse_from(["mel-train", "train", "-c", arg(&dir.join("radtts.yaml"))]);

    let err = run_cli(cli).unwrap_err();

    assert!(is_fatal_config_error(&err));
    assert!(!dir.join("checkpoints").exists());

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn unsupported_optimizer_exits_with_status_one() {
    let dir = fixture("melops_train_cli_sgd_exit", "SGD");

    let status = Command::new(env!("CARGO_BIN_EXE_mel-train"))
        .args(["train", "-c", arg(&dir.join("radtts.yaml"))])
        .status()
        .expect("failed to run mel-train");

    assert_eq!(status.code(), Some(1));

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn missing_config_is_an_error() {
    let cli = Cli::parse_from(["mel-train", "parse", "-c", "/nonexistent/radtts.yaml", "ab"]);

    let err = run_cli(cli).unwrap_err();

    assert!(!is_fatal_config_error(&err));
    assert!(format!("{err:#}").contains("failed to load config"));
}
