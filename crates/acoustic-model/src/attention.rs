//! Convolutional text/audio attention scorer.

use candle_core::{D, DType, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Module, VarBuilder, conv1d};

use crate::traits::{AlignmentInputs, AlignmentScorer};

const TEMPERATURE: f64 = 0.0005;
const PRIOR_EPS: f64 = 1e-8;

fn conv(in_channels: usize, out_channels: usize, kernel_size: usize, vb: VarBuilder) -> Result<Conv1d> {
    let config = Conv1dConfig {
        padding: kernel_size / 2,
        ..Default::default()
    };
    conv1d(in_channels, out_channels, kernel_size, config, vb.pp("conv"))
}

/// Scores every mel frame against every token by negative squared distance
/// between learned projections of both.
#[derive(Debug)]
pub struct ConvAttention {
    key_in: Conv1d,
    key_out: Conv1d,
    query_in: Conv1d,
    query_mid: Conv1d,
    query_out: Conv1d,
}

impl ConvAttention {
    pub fn new(
        n_mel_channels: usize,
        n_text_channels: usize,
        n_att_channels: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let key = vb.pp("key_proj");
        let query = vb.pp("query_proj");
        Ok(Self {
            key_in: conv(n_text_channels, 2 * n_text_channels, 3, key.pp("0"))?,
            key_out: conv(2 * n_text_channels, n_att_channels, 1, key.pp("2"))?,
            query_in: conv(n_mel_channels, 2 * n_mel_channels, 3, query.pp("0"))?,
            query_mid: conv(2 * n_mel_channels, n_mel_channels, 1, query.pp("2"))?,
            query_out: conv(n_mel_channels, n_att_channels, 1, query.pp("4"))?,
        })
    }

    fn project_keys(&self, text_emb: &Tensor) -> Result<Tensor> {
        let x = text_emb.transpose(1, 2)?.contiguous()?;
        let x = self.key_in.forward(&x)?.relu()?;
        self.key_out.forward(&x)
    }

    fn project_queries(&self, mel: &Tensor) -> Result<Tensor> {
        let x = self.query_in.forward(mel)?.relu()?;
        let x = self.query_mid.forward(&x)?.relu()?;
        self.query_out.forward(&x)
    }
}

impl AlignmentScorer for ConvAttention {
    fn score(&self, inputs: AlignmentInputs<'_>) -> Result<(Tensor, Tensor)> {
        let mel = inputs.mel.to_dtype(DType::F32)?;
        let keys = self.project_keys(inputs.text_emb)?;
        let queries = self.project_queries(&mel)?;

        // ||q - k||^2 = ||q||^2 + ||k||^2 - 2 q.k, computed without the
        // (batch, channels, frames, tokens) intermediate.
        let cross = queries.transpose(1, 2)?.contiguous()?.matmul(&keys)?;
        let q_norm = queries.sqr()?.sum(1)?.unsqueeze(2)?;
        let k_norm = keys.sqr()?.sum(1)?.unsqueeze(1)?;
        let distance = (q_norm.broadcast_add(&k_norm)? - (cross * 2.0)?)?.relu()?;
        let mut attn = (distance * -TEMPERATURE)?;

        if let Some(prior) = inputs.attn_prior {
            let log_prior = (prior.to_dtype(DType::F32)? + PRIOR_EPS)?.log()?;
            attn = (candle_nn::ops::log_softmax(&attn, D::Minus1)? + log_prior)?;
        }
        let logprob = attn.unsqueeze(1)?;

        let (batch, _, frames, tokens) = logprob.dims4()?;
        let valid = inputs
            .key_mask
            .ne(0f32)?
            .reshape((batch, 1, 1, tokens))?
            .broadcast_as((batch, 1, frames, tokens))?;
        let blocked = Tensor::full(f32::NEG_INFINITY, (batch, 1, frames, tokens), logprob.device())?;
        let masked = valid.where_cond(&logprob, &blocked)?;
        let soft = candle_nn::ops::softmax_last_dim(&masked)?;
        Ok((soft, logprob))
    }
}
