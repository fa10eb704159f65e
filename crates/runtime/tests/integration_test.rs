//! Integration tests for the runtime session.

use std::sync::Arc;

use acoustic_model::FastPitchConfig;
use runtime::InferenceSession;
use tts_core::config::ModelConfig;
use tts_core::{DeviceType, HookStage, ProsodyBundle, RuntimeConfig, TtsError, TtsResult};

fn tiny_runtime_config(dir: &tempfile::TempDir) -> RuntimeConfig {
    let arch_path = dir.path().join("fastpitch.json");
    std::fs::write(
        &arch_path,
        serde_json::to_string(&FastPitchConfig::tiny()).unwrap(),
    )
    .unwrap();

    let mut config = RuntimeConfig::default();
    config.device.device_type = DeviceType::Cpu;
    config.model = ModelConfig {
        weights_path: None,
        architecture_path: Some(arch_path),
        seed: Some(11),
    };
    config
}

#[test]
fn test_session_from_config_random_weights() {
    let dir = tempfile::tempdir().unwrap();
    let session = InferenceSession::from_config(&tiny_runtime_config(&dir)).unwrap();
    assert_eq!(session.model().config().n_mel_channels, 8);

    let request = session.request(&[1, 2, 3, 4]).unwrap();
    let output = session.infer(&request).unwrap();
    let (batch, channels, frames) = output.mel.dims3().unwrap();
    assert_eq!((batch, channels), (1, 8));
    assert_eq!(frames, output.mel_lens[0] as usize);
    assert_eq!(output.durations.dims2().unwrap(), (1, 4));
}

#[test]
fn test_same_seed_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_runtime_config(&dir);
    let a = InferenceSession::from_config(&config).unwrap();
    let b = InferenceSession::from_config(&config).unwrap();

    let out_a = a.infer(&a.request(&[5, 6, 7]).unwrap()).unwrap();
    let out_b = b.infer(&b.request(&[5, 6, 7]).unwrap()).unwrap();
    assert_eq!(out_a.prosody(0).unwrap(), out_b.prosody(0).unwrap());
    assert_eq!(out_a.mel_lens, out_b.mel_lens);
}

#[test]
fn test_missing_weights_is_model_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = tiny_runtime_config(&dir);
    config.model.weights_path = Some(dir.path().join("missing.safetensors"));
    let err = InferenceSession::from_config(&config).unwrap_err();
    assert!(matches!(err, TtsError::ModelLoad { .. }));
}

#[test]
fn test_hook_failure_surfaces_through_session() {
    let dir = tempfile::tempdir().unwrap();
    let session = InferenceSession::from_config(&tiny_runtime_config(&dir)).unwrap();
    session.register_hook(Arc::new(
        |stage: HookStage, _bundle: ProsodyBundle| -> TtsResult<ProsodyBundle> {
            Err(TtsError::hook(format!("rejected at {stage}")))
        },
    ));

    let request = session.request(&[1, 2]).unwrap();
    assert!(session.infer(&request).is_err());
}

#[test]
fn test_supplied_prosody_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let session = InferenceSession::from_config(&tiny_runtime_config(&dir)).unwrap();

    let first = session.infer(&session.request(&[3, 4, 5]).unwrap()).unwrap();
    let curves = first.prosody(0).unwrap();

    let again = session
        .infer(&session.request(&[3, 4, 5]).unwrap().with_existing(curves.clone()))
        .unwrap();
    assert!(again.used_supplied);
    assert_eq!(again.prosody(0).unwrap().durations, curves.durations);
    assert_eq!(again.mel_lens, first.mel_lens);
}
