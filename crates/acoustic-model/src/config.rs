//! FastPitch architecture configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use tts_core::{TtsError, TtsResult};

/// Feed-forward transformer stack settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FftConfig {
    /// Number of transformer layers.
    pub n_layers: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Dimension of each attention head.
    pub d_head: usize,
    /// Kernel size of the position-wise convolutions.
    pub conv1d_kernel_size: usize,
    /// Inner channel count of the position-wise convolutions.
    pub conv1d_filter_size: usize,
    /// Residual dropout.
    pub dropout: f32,
    /// Attention probability dropout.
    pub dropatt: f32,
    /// Dropout applied to the summed input embeddings.
    pub dropemb: f32,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            n_layers: 6,
            n_heads: 1,
            d_head: 64,
            conv1d_kernel_size: 3,
            conv1d_filter_size: 1536,
            dropout: 0.1,
            dropatt: 0.1,
            dropemb: 0.0,
        }
    }
}

/// Temporal predictor settings (duration, pitch, energy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Convolution kernel size (odd).
    pub kernel_size: usize,
    /// Convolution channel count.
    pub filter_size: usize,
    /// Dropout after each block.
    pub dropout: f32,
    /// Number of conv blocks.
    pub n_layers: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            filter_size: 256,
            dropout: 0.1,
            n_layers: 2,
        }
    }
}

/// Configuration for the FastPitch model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastPitchConfig {
    /// Number of mel channels produced.
    pub n_mel_channels: usize,
    /// Size of the symbol vocabulary.
    pub n_symbols: usize,
    /// Symbol id used for padding.
    pub padding_idx: u32,
    /// Model dimension (symbol embedding and transformer width).
    pub symbols_embedding_dim: usize,
    /// Input (token-rate) transformer.
    #[serde(default)]
    pub encoder: FftConfig,
    /// Output (frame-rate) transformer.
    #[serde(default)]
    pub decoder: FftConfig,
    /// Duration predictor.
    #[serde(default)]
    pub duration_predictor: PredictorConfig,
    /// Pitch predictor.
    #[serde(default)]
    pub pitch_predictor: PredictorConfig,
    /// Kernel size of the pitch embedding convolution.
    #[serde(default = "default_embedding_kernel_size")]
    pub pitch_embedding_kernel_size: usize,
    /// Number of pitch channels predicted and embedded.
    #[serde(default = "default_pitch_formants")]
    pub pitch_conditioning_formants: usize,
    /// Whether energy is predicted and embedded.
    #[serde(default = "default_energy_conditioning")]
    pub energy_conditioning: bool,
    /// Energy predictor.
    #[serde(default)]
    pub energy_predictor: PredictorConfig,
    /// Kernel size of the energy embedding convolution.
    #[serde(default = "default_embedding_kernel_size")]
    pub energy_embedding_kernel_size: usize,
    /// Number of speakers; a speaker table exists only when greater than 1.
    #[serde(default = "default_n_speakers")]
    pub n_speakers: usize,
    /// Scale applied to the speaker embedding.
    #[serde(default = "default_speaker_emb_weight")]
    pub speaker_emb_weight: f32,
    /// Channel count of the alignment attention space.
    #[serde(default = "default_n_att_channels")]
    pub n_att_channels: usize,
    /// Width of the monotonic alignment search band.
    #[serde(default = "default_mas_width")]
    pub mas_width: usize,
}

fn default_embedding_kernel_size() -> usize {
    3
}

fn default_pitch_formants() -> usize {
    1
}

fn default_energy_conditioning() -> bool {
    true
}

fn default_n_speakers() -> usize {
    1
}

fn default_speaker_emb_weight() -> f32 {
    1.0
}

fn default_n_att_channels() -> usize {
    80
}

fn default_mas_width() -> usize {
    1
}

impl Default for FastPitchConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: 80,
            n_symbols: 148,
            padding_idx: 0,
            symbols_embedding_dim: 384,
            encoder: FftConfig::default(),
            decoder: FftConfig::default(),
            duration_predictor: PredictorConfig::default(),
            pitch_predictor: PredictorConfig::default(),
            pitch_embedding_kernel_size: default_embedding_kernel_size(),
            pitch_conditioning_formants: default_pitch_formants(),
            energy_conditioning: default_energy_conditioning(),
            energy_predictor: PredictorConfig::default(),
            energy_embedding_kernel_size: default_embedding_kernel_size(),
            n_speakers: default_n_speakers(),
            speaker_emb_weight: default_speaker_emb_weight(),
            n_att_channels: default_n_att_channels(),
            mas_width: default_mas_width(),
        }
    }
}

impl FastPitchConfig {
    /// A very small configuration for tests and benchmarks.
    pub fn tiny() -> Self {
        let fft = FftConfig {
            n_layers: 1,
            n_heads: 2,
            d_head: 8,
            conv1d_kernel_size: 3,
            conv1d_filter_size: 32,
            dropout: 0.1,
            dropatt: 0.1,
            dropemb: 0.0,
        };
        let predictor = PredictorConfig {
            kernel_size: 3,
            filter_size: 8,
            dropout: 0.1,
            n_layers: 2,
        };
        Self {
            n_mel_channels: 8,
            n_symbols: 16,
            padding_idx: 0,
            symbols_embedding_dim: 16,
            encoder: fft.clone(),
            decoder: fft,
            duration_predictor: predictor.clone(),
            pitch_predictor: predictor.clone(),
            energy_predictor: predictor,
            n_att_channels: 8,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> TtsResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the layers cannot be built from.
    pub fn validate(&self) -> TtsResult<()> {
        let d_model = self.symbols_embedding_dim;
        if d_model == 0 || d_model % 2 != 0 {
            return Err(TtsError::config(format!(
                "symbols_embedding_dim must be even and positive, got {d_model}"
            )));
        }
        if self.padding_idx as usize >= self.n_symbols {
            return Err(TtsError::config(format!(
                "padding_idx {} outside vocabulary of {}",
                self.padding_idx, self.n_symbols
            )));
        }
        for (name, fft) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            if fft.n_heads == 0 || fft.d_head == 0 {
                return Err(TtsError::config(format!("{name} needs at least one head")));
            }
            if fft.conv1d_kernel_size % 2 == 0 {
                return Err(TtsError::config(format!("{name} kernel size must be odd")));
            }
        }
        for (name, predictor) in [
            ("duration_predictor", &self.duration_predictor),
            ("pitch_predictor", &self.pitch_predictor),
            ("energy_predictor", &self.energy_predictor),
        ] {
            if predictor.n_layers == 0 {
                return Err(TtsError::config(format!("{name} needs at least one layer")));
            }
            if predictor.kernel_size % 2 == 0 {
                return Err(TtsError::config(format!("{name} kernel size must be odd")));
            }
        }
        if self.pitch_embedding_kernel_size % 2 == 0 || self.energy_embedding_kernel_size % 2 == 0
        {
            return Err(TtsError::config("embedding kernel sizes must be odd"));
        }
        if self.pitch_conditioning_formants == 0 {
            return Err(TtsError::config("at least one pitch formant is required"));
        }
        if self.n_speakers == 0 {
            return Err(TtsError::config("n_speakers must be at least 1"));
        }
        if self.mas_width == 0 {
            return Err(TtsError::config("mas_width must be at least 1"));
        }
        Ok(())
    }
}
