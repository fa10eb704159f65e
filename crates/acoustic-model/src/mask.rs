//! Padding masks.

use candle_core::{DType, Device, Result, Tensor};

/// Build a `(batch, max_len)` mask of ones for positions below each length.
pub fn mask_from_lens(lens: &[u32], max_len: usize, device: &Device) -> Result<Tensor> {
    let batch = lens.len();
    let positions = Tensor::arange(0u32, max_len as u32, device)?.unsqueeze(0)?;
    let lens = Tensor::new(lens, device)?.unsqueeze(1)?;
    positions
        .broadcast_lt(&lens)?
        .to_dtype(DType::F32)?
        .reshape((batch, max_len))
}

/// Build a `(batch, len)` mask of ones where `tokens` differ from `padding_idx`.
pub fn mask_from_tokens(tokens: &Tensor, padding_idx: u32) -> Result<Tensor> {
    tokens.ne(padding_idx)?.to_dtype(DType::F32)
}
