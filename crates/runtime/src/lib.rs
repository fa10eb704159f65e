//! # runtime
//!
//! Runtime wiring for the FastPitch engine.
//!
//! This crate provides:
//! - Structured logging setup (`tracing-subscriber`)
//! - Compute device selection (CPU, CUDA, Metal)
//! - Inference metrics through the `metrics` facade
//! - [`InferenceSession`]: a loaded model plus its prosody hooks

pub mod device;
pub mod logging;
pub mod metrics;
pub mod session;

pub use device::{DevicePreference, select_device};
pub use logging::{LogFormat, init_logging};
pub use metrics::SessionMetrics;
pub use session::InferenceSession;
