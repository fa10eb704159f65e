//! # tts-core
//!
//! Core types, traits, and error definitions for the FastPitch engine.
//!
//! This crate provides the foundational abstractions used across all other crates
//! in the workspace, including:
//!
//! - Prosody data exchanged with callers and hooks (`ProsodyCurves`, `ProsodyBundle`)
//! - The typed prosody hook contract (`ProsodyHook`, `ProsodyHooks`)
//! - Unified error handling via `TtsError`
//! - Runtime configuration structures

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{DeviceType, InferenceConfig, LoggingConfig, RuntimeConfig};
pub use error::{TtsError, TtsResult};
pub use traits::{ProsodyHook, ProsodyHooks};
pub use types::{HookStage, ProsodyBundle, ProsodyCurves};
