//! Inference session: a loaded model, its registered hooks and defaults.

use std::sync::Arc;
use std::time::Instant;

use acoustic_model::{FastPitch, FastPitchConfig, InferenceOutput, InferenceRequest};
use candle_core::Device;
use parking_lot::RwLock;
use tracing::{info, info_span, warn};
use tts_core::{InferenceConfig, ProsodyHook, ProsodyHooks, RuntimeConfig, TtsResult};
use uuid::Uuid;

use crate::device::{device_name, select_from_config};
use crate::metrics::SessionMetrics;

/// A model ready to serve inference calls.
///
/// Hooks can be registered while the session is shared; each call snapshots
/// the hook set it runs with.
#[derive(Debug)]
pub struct InferenceSession {
    model: FastPitch,
    hooks: RwLock<ProsodyHooks>,
    defaults: InferenceConfig,
    metrics: SessionMetrics,
}

impl InferenceSession {
    /// Wrap an already constructed model.
    pub fn new(model: FastPitch, defaults: InferenceConfig, metrics: SessionMetrics) -> TtsResult<Self> {
        defaults.validate()?;
        Ok(Self {
            model,
            hooks: RwLock::new(ProsodyHooks::new()),
            defaults,
            metrics,
        })
    }

    /// Select the device, then load or randomly initialise the model as the
    /// config describes.
    pub fn from_config(config: &RuntimeConfig) -> TtsResult<Self> {
        let device = select_from_config(&config.device)?;
        let architecture = match &config.model.architecture_path {
            Some(path) => FastPitchConfig::from_json_file(path)?,
            None => FastPitchConfig::default(),
        };
        Self::build(config, architecture, &device)
    }

    /// Like [`from_config`](Self::from_config) with an explicit architecture
    /// and device.
    pub fn build(
        config: &RuntimeConfig,
        architecture: FastPitchConfig,
        device: &Device,
    ) -> TtsResult<Self> {
        let model = match &config.model.weights_path {
            Some(path) => FastPitch::load(path, architecture, device)?,
            None => {
                let seed = config.model.seed.unwrap_or(0);
                warn!(seed, "no weights configured, using random weights");
                FastPitch::new_random(architecture, device, seed)?.0
            }
        };
        info!(device = device_name(device), "inference session ready");
        Self::new(
            model,
            config.inference.clone(),
            SessionMetrics::new(config.metrics.enabled),
        )
    }

    pub fn model(&self) -> &FastPitch {
        &self.model
    }

    pub fn defaults(&self) -> &InferenceConfig {
        &self.defaults
    }

    /// Add a hook; it applies to calls started afterwards.
    pub fn register_hook(&self, hook: Arc<dyn ProsodyHook>) {
        self.hooks.write().register(hook);
    }

    /// Number of registered hooks.
    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Single-utterance request carrying the session defaults.
    pub fn request(&self, ids: &[u32]) -> TtsResult<InferenceRequest> {
        Ok(InferenceRequest::from_ids(ids, self.model.device())?.with_config(self.defaults.clone()))
    }

    /// Run inference with the registered hooks.
    pub fn infer(&self, request: &InferenceRequest) -> TtsResult<InferenceOutput> {
        let request_id = Uuid::new_v4();
        let span = info_span!("infer", %request_id, tokens = ?request.tokens.dims());
        let _enter = span.enter();

        self.metrics.request_received();
        let hooks = self.hooks.read().clone();
        let started = Instant::now();

        let output = match self.model.infer(request, &hooks) {
            Ok(output) => output,
            Err(err) => {
                self.metrics.request_failed();
                return Err(err);
            }
        };

        if request.existing.is_some() && !output.used_supplied {
            self.metrics.prosody_fallback();
        }
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.request_completed(&output.mel_lens, latency_ms);
        info!(frames = ?output.mel_lens, latency_ms, "inference complete");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::{HookStage, ProsodyBundle};

    fn session() -> InferenceSession {
        let (model, _) = FastPitch::new_random(FastPitchConfig::tiny(), &Device::Cpu, 3).unwrap();
        InferenceSession::new(model, InferenceConfig::default(), SessionMetrics::disabled()).unwrap()
    }

    #[test]
    fn test_request_uses_defaults() {
        let mut defaults = InferenceConfig::default();
        defaults.pace = 1.5;
        let (model, _) = FastPitch::new_random(FastPitchConfig::tiny(), &Device::Cpu, 3).unwrap();
        let session = InferenceSession::new(model, defaults, SessionMetrics::disabled()).unwrap();
        let request = session.request(&[1, 2, 3]).unwrap();
        assert_eq!(request.config.pace, 1.5);
    }

    #[test]
    fn test_invalid_defaults_rejected() {
        let mut defaults = InferenceConfig::default();
        defaults.pace = -1.0;
        let (model, _) = FastPitch::new_random(FastPitchConfig::tiny(), &Device::Cpu, 3).unwrap();
        assert!(InferenceSession::new(model, defaults, SessionMetrics::disabled()).is_err());
    }

    #[test]
    fn test_registered_hooks_run() {
        let session = session();
        session.register_hook(Arc::new(
            |_stage: HookStage, mut bundle: ProsodyBundle| -> TtsResult<ProsodyBundle> {
                for d in bundle.durations.iter_mut().flatten() {
                    *d = 2.0;
                }
                Ok(bundle)
            },
        ));
        assert_eq!(session.hook_count(), 1);

        let request = session.request(&[4, 5, 6]).unwrap();
        let output = session.infer(&request).unwrap();
        assert_eq!(output.mel_lens, vec![6]);
    }
}
