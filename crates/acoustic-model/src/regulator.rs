//! Length regulation: token-rate features to frame-rate features.

use candle_core::{DType, Tensor};
use tracing::trace;
use tts_core::{TtsError, TtsResult};

/// Expand `(batch, tokens, dim)` features by per-token `durations`.
///
/// Durations are divided by `pace` and rounded half up, so `[2, 3]` at pace
/// 2.0 becomes `[1, 2]`. Frame `t` of a sample copies the features of the
/// token whose cumulative interval contains `t`; frames past a sample's
/// length are zero. With `max_frames` the output is truncated to that many
/// frames and the returned lengths are clamped to it.
///
/// Returns the `(batch, frames, dim)` features and per-sample frame counts.
pub fn regulate_len(
    durations: &Tensor,
    enc_out: &Tensor,
    pace: f32,
    max_frames: Option<usize>,
) -> TtsResult<(Tensor, Vec<u32>)> {
    if !pace.is_finite() || pace <= 0.0 {
        return Err(TtsError::invalid_input(format!(
            "pace must be positive and finite, got {pace}"
        )));
    }
    let (batch, tokens, dim) = enc_out.dims3()?;
    let device = enc_out.device();

    let reps = ((durations.to_dtype(DType::F32)? / pace as f64)? + 0.5)?
        .floor()?
        .relu()?;
    let lens: Vec<u32> = reps
        .sum(1)?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|len| len as u32)
        .collect();

    let longest = lens.iter().copied().max().unwrap_or(0) as usize;
    let frames = max_frames.map_or(longest, |cap| cap.min(longest));
    let lens: Vec<u32> = lens.into_iter().map(|len| len.min(frames as u32)).collect();
    trace!(batch, tokens, frames, "regulating lengths");

    if frames == 0 || tokens == 0 {
        let empty = Tensor::zeros((batch, frames, dim), enc_out.dtype(), device)?;
        return Ok((empty, lens));
    }

    // Token l covers frames [cums[l], cums[l + 1]).
    let cums = reps.cumsum(1)?.pad_with_zeros(1, 1, 0)?;
    let starts = cums.narrow(1, 0, tokens)?.unsqueeze(1)?;
    let ends = cums.narrow(1, 1, tokens)?.unsqueeze(1)?;
    let positions = Tensor::arange(0u32, frames as u32, device)?
        .to_dtype(DType::F32)?
        .reshape((1, frames, 1))?;

    let after_start = starts.broadcast_le(&positions)?;
    let before_end = ends.broadcast_gt(&positions)?;
    let selection = (after_start.to_dtype(DType::F32)? * before_end.to_dtype(DType::F32)?)?;

    let frames_out = selection
        .to_dtype(enc_out.dtype())?
        .matmul(&enc_out.contiguous()?)?;
    Ok((frames_out, lens))
}
