//! Configuration structures for the FastPitch engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TtsError, TtsResult};

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Model location.
    #[serde(default)]
    pub model: ModelConfig,

    /// Compute device preference.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Inference defaults.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl RuntimeConfig {
    /// Load a runtime configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> TtsResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.inference.validate()?;
        Ok(config)
    }
}

/// Model location configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to model weights (safetensors). Random weights when absent.
    pub weights_path: Option<PathBuf>,
    /// Path to the architecture config (JSON). Defaults when absent.
    pub architecture_path: Option<PathBuf>,
    /// Seed used for random initialisation.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Compute device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Preferred device type.
    #[serde(default)]
    pub device_type: DeviceType,
    /// Specific GPU device index (if using CUDA or Metal).
    pub gpu_index: Option<usize>,
}

/// Device type for computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Pick the best compiled-in device.
    #[default]
    Auto,
    /// CPU computation.
    Cpu,
    /// CUDA GPU computation.
    Cuda,
    /// Metal GPU computation (Apple).
    Metal,
}

/// Inference defaults applied when a request leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    /// Speaking rate divisor applied to durations before rounding.
    #[serde(default = "default_pace")]
    pub pace: f32,
    /// Upper clamp for predicted durations, in frames.
    #[serde(default = "default_max_duration")]
    pub max_duration: f32,
    /// Lower clamp for predicted durations of valid tokens, in frames.
    #[serde(default = "default_min_duration")]
    pub min_duration: f32,
    /// Predicted (normalised) pitch is clamped to `[-pitch_clamp, pitch_clamp]`.
    #[serde(default = "default_pitch_clamp")]
    pub pitch_clamp: f32,
}

fn default_pace() -> f32 {
    1.0
}

fn default_max_duration() -> f32 {
    75.0
}

fn default_min_duration() -> f32 {
    0.25
}

fn default_pitch_clamp() -> f32 {
    3.0
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            pace: default_pace(),
            max_duration: default_max_duration(),
            min_duration: default_min_duration(),
            pitch_clamp: default_pitch_clamp(),
        }
    }
}

impl InferenceConfig {
    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> TtsResult<()> {
        if !(self.pace.is_finite() && self.pace > 0.0) {
            return Err(TtsError::config(format!(
                "pace must be a positive number, got {}",
                self.pace
            )));
        }
        if !(self.min_duration >= 0.0 && self.min_duration <= self.max_duration) {
            return Err(TtsError::config(format!(
                "duration clamp range [{}, {}] is empty",
                self.min_duration, self.max_duration
            )));
        }
        if !(self.pitch_clamp > 0.0) {
            return Err(TtsError::config("pitch_clamp must be positive"));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json or text).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}
