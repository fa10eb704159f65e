//! Infer command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use tts_core::{ProsodyCurves, RuntimeConfig};

use runtime::{DevicePreference, InferenceSession};

/// Options for the infer command.
#[derive(Debug, Default)]
pub struct InferOptions {
    pub tokens: Vec<u32>,
    pub config: Option<PathBuf>,
    pub weights: Option<PathBuf>,
    pub architecture: Option<PathBuf>,
    pub seed: Option<u64>,
    pub device: Option<DevicePreference>,
    pub pace: Option<f32>,
    pub speaker: Option<u32>,
    pub prosody: Option<PathBuf>,
    pub old_tokens: Option<Vec<u32>>,
    pub output: Option<PathBuf>,
}

/// What the command prints: the prosody that produced the frames plus
/// enough bookkeeping to feed it back through `--prosody`.
#[derive(Debug, Serialize)]
struct InferReport {
    frames: u32,
    used_supplied: bool,
    splice_start: Option<usize>,
    splice_end: Option<usize>,
    prosody: ProsodyCurves,
    #[serde(skip_serializing_if = "Option::is_none")]
    pitch_hz: Option<Vec<Vec<f32>>>,
}

/// Run the infer command.
pub fn run(options: InferOptions) -> Result<()> {
    let config = runtime_config(&options)?;
    let session = InferenceSession::from_config(&config).context("failed to build session")?;

    let mut request = session.request(&options.tokens)?;
    if let Some(pace) = options.pace {
        request = request.with_pace(pace);
    }
    if let Some(speaker) = options.speaker {
        request = request.with_speaker(speaker);
    }
    if let Some(path) = &options.prosody {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let curves: ProsodyCurves =
            serde_json::from_str(&content).context("invalid prosody file")?;
        request = match options.old_tokens.clone() {
            Some(old_tokens) => request.with_edit(curves, old_tokens),
            None => request.with_existing(curves),
        };
    }

    let output = session.infer(&request)?;
    let report = InferReport {
        frames: output.mel_lens[0],
        used_supplied: output.used_supplied,
        splice_start: output.splice_start,
        splice_end: output.splice_end,
        prosody: output.prosody(0)?,
        pitch_hz: output.pitch_hz(0)?,
    };
    info!(
        tokens = options.tokens.len(),
        frames = report.frames,
        used_supplied = report.used_supplied,
        "inference finished"
    );

    let json = serde_json::to_string_pretty(&report)?;
    match &options.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn runtime_config(options: &InferOptions) -> Result<RuntimeConfig> {
    let mut config = match &options.config {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(weights) = &options.weights {
        config.model.weights_path = Some(weights.clone());
    }
    if let Some(architecture) = &options.architecture {
        config.model.architecture_path = Some(architecture.clone());
    }
    if options.seed.is_some() {
        config.model.seed = options.seed;
    }
    if let Some(device) = options.device {
        config.device.device_type = device.into();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let options = InferOptions {
            tokens: vec![1, 2],
            weights: Some(PathBuf::from("model.safetensors")),
            seed: Some(9),
            device: Some(DevicePreference::Cpu),
            ..Default::default()
        };
        let config = runtime_config(&options).unwrap();
        assert_eq!(
            config.model.weights_path,
            Some(PathBuf::from("model.safetensors"))
        );
        assert_eq!(config.model.seed, Some(9));
        assert_eq!(config.device.device_type, tts_core::DeviceType::Cpu);
    }

    #[test]
    fn test_config_file_kept_without_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, r#"{"device": {"device_type": "cuda"}, "model": {"seed": 3}}"#)
            .unwrap();
        let options = InferOptions {
            tokens: vec![1],
            config: Some(path),
            ..Default::default()
        };
        let config = runtime_config(&options).unwrap();
        assert_eq!(config.device.device_type, tts_core::DeviceType::Cuda);
        assert_eq!(config.model.seed, Some(3));
    }
}
