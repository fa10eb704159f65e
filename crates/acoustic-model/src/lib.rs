//! # acoustic-model
//!
//! FastPitch acoustic model: text tokens to mel-spectrogram frames with
//! explicit per-token duration, pitch and energy.
//!
//! The crate provides:
//! - Interval averaging of frame-rate signals over token durations
//! - Monotonic alignment search (MAS) turning soft attention into durations
//! - Length regulation from token rate to frame rate
//! - Temporal predictors, the feed-forward transformer and conv attention
//! - The [`FastPitch`] orchestrator with training and inference passes
//!
//! # Example
//!
//! ```ignore
//! use acoustic_model::{FastPitch, FastPitchConfig, InferenceRequest};
//! use candle_core::Device;
//! use tts_core::ProsodyHooks;
//!
//! let device = Device::Cpu;
//! let model = FastPitch::load("fastpitch.safetensors", FastPitchConfig::default(), &device)?;
//! let request = InferenceRequest::from_ids(&[12, 40, 7, 33], &device)?.with_pace(1.1);
//! let output = model.infer(&request, &ProsodyHooks::new())?;
//! println!("{} frames", output.mel_lens[0]);
//! ```

pub mod alignment;
pub mod attention;
pub mod averager;
pub mod config;
pub mod mask;
pub mod model;
pub mod predictor;
pub mod prosody;
pub mod regulator;
pub mod splice;
pub mod stats;
pub mod traits;
pub mod transformer;

pub use alignment::{AlignmentSearch, HardAlignment, LogProbGrid, MonotonicSearch, binarize_attention};
pub use attention::ConvAttention;
pub use averager::average_over_durations;
pub use config::{FastPitchConfig, FftConfig, PredictorConfig};
pub use model::{
    FastPitch, ForwardOptions, InferenceOutput, InferenceRequest, TrainingBatch, TrainingOutput,
};
pub use predictor::TemporalPredictor;
pub use prosody::{ProsodySource, ValidatedProsody};
pub use regulator::regulate_len;
pub use splice::SpliceBounds;
pub use stats::PitchStats;
pub use traits::{AlignmentInputs, AlignmentScorer, FrameDecoder, TokenEncoder};
pub use transformer::FfTransformer;
