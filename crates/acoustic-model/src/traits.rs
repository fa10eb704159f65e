//! Seams between the FastPitch orchestrator and its sub-networks.
//!
//! The orchestrator only relies on these contracts; [`crate::transformer`]
//! and [`crate::attention`] provide the default implementations.

use candle_core::{Result, Tensor};

/// Token-rate encoder.
pub trait TokenEncoder: std::fmt::Debug + Send + Sync {
    /// Embed `(batch, tokens)` ids into `(batch, tokens, dim)` without
    /// running the transformer layers.
    fn embed_tokens(&self, tokens: &Tensor) -> Result<Tensor>;

    /// Encode `(batch, tokens)` ids, adding an optional `(batch, 1, dim)`
    /// conditioning vector to the input.
    ///
    /// Returns `(batch, tokens, dim)` features and a `(batch, tokens, 1)`
    /// 0/1 mask of valid positions.
    fn encode(
        &self,
        tokens: &Tensor,
        conditioning: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)>;
}

/// Frame-rate decoder.
pub trait FrameDecoder: std::fmt::Debug + Send + Sync {
    /// Decode `(batch, frames, dim)` features whose valid prefixes are
    /// `lens` long. Returns features and a `(batch, frames, 1)` mask.
    fn decode(&self, frames: &Tensor, lens: &[u32], train: bool) -> Result<(Tensor, Tensor)>;
}

/// Inputs of an [`AlignmentScorer`].
#[derive(Debug, Clone, Copy)]
pub struct AlignmentInputs<'a> {
    /// Target mel spectrogram, `(batch, n_mel, frames)`.
    pub mel: &'a Tensor,
    /// Token embeddings, `(batch, tokens, dim)`.
    pub text_emb: &'a Tensor,
    /// Valid frame count per sample.
    pub mel_lens: &'a [u32],
    /// `(batch, tokens)` 0/1 mask of valid tokens.
    pub key_mask: &'a Tensor,
    /// Optional `(batch, frames, tokens)` alignment prior.
    pub attn_prior: Option<&'a Tensor>,
}

/// Soft text/audio attention.
pub trait AlignmentScorer: std::fmt::Debug + Send + Sync {
    /// Returns the `(batch, 1, frames, tokens)` soft attention, normalised
    /// over tokens, and the unnormalised log-probabilities of the same shape.
    fn score(&self, inputs: AlignmentInputs<'_>) -> Result<(Tensor, Tensor)>;
}
