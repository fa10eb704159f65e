//! Unified error types for the FastPitch engine.

use std::path::PathBuf;

/// Main error type for acoustic model operations.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// Target durations extracted from the hard alignment do not cover the
    /// target mel frames. Raised only by the training forward pass.
    #[error("alignment mismatch in sample {sample}: durations sum to {actual}, expected {expected} frames")]
    AlignmentMismatch {
        sample: usize,
        expected: u32,
        actual: u32,
    },

    /// Model loading error.
    #[error("model load failed for {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// A prosody hook rejected or corrupted its bundle.
    #[error("prosody hook failed: {0}")]
    Hook(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tensor backend error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with TtsError.
pub type TtsResult<T> = Result<T, TtsError>;

impl TtsError {
    /// Create a hook error with message.
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error with message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error with message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error signals a broken alignment implementation rather
    /// than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AlignmentMismatch { .. } | Self::Internal(_))
    }
}

impl From<serde_json::Error> for TtsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TtsError::invalid_input("pace must be positive");
        assert_eq!(err.to_string(), "invalid input: pace must be positive");

        let err = TtsError::AlignmentMismatch {
            sample: 2,
            expected: 120,
            actual: 119,
        };
        assert_eq!(
            err.to_string(),
            "alignment mismatch in sample 2: durations sum to 119, expected 120 frames"
        );
    }

    #[test]
    fn test_error_constructors() {
        let err = TtsError::hook("shape changed");
        assert!(matches!(err, TtsError::Hook(_)));
        assert!(!err.is_fatal());

        let err = TtsError::AlignmentMismatch {
            sample: 0,
            expected: 1,
            actual: 0,
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tensor_error_conversion() {
        let err: TtsError = candle_core::Error::Msg("bad shape".into()).into();
        assert!(matches!(err, TtsError::Tensor(_)));
    }
}
