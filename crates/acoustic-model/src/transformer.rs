//! Feed-forward transformer (FFT) stacks used as encoder and decoder.

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, Dropout, Embedding, LayerNorm, Linear, Module, VarBuilder, conv1d,
    embedding, layer_norm, linear, linear_no_bias,
};

use crate::config::FftConfig;
use crate::mask::{mask_from_lens, mask_from_tokens};
use crate::traits::{FrameDecoder, TokenEncoder};

/// Sinusoidal position embedding: `[sin(pos * f), cos(pos * f)]`.
#[derive(Debug, Clone)]
pub struct PositionalEmbedding {
    inv_freq: Tensor,
}

impl PositionalEmbedding {
    pub fn new(d_model: usize, device: &Device) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..d_model)
            .step_by(2)
            .map(|i| 1.0 / 10000f32.powf(i as f32 / d_model as f32))
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;
        Ok(Self { inv_freq })
    }

    /// Embedding of positions `0..len`, shape `(1, len, d_model)`.
    pub fn forward(&self, len: usize) -> Result<Tensor> {
        let positions = Tensor::arange(0u32, len as u32, self.inv_freq.device())?
            .to_dtype(DType::F32)?
            .unsqueeze(1)?;
        let sinusoid = positions.matmul(&self.inv_freq.unsqueeze(0)?)?;
        Tensor::cat(&[sinusoid.sin()?, sinusoid.cos()?], 1)?.unsqueeze(0)
    }
}

/// Post-norm multi-head self attention with a key padding mask.
#[derive(Debug)]
pub struct MultiHeadAttn {
    qkv_net: Linear,
    o_net: Linear,
    layer_norm: LayerNorm,
    dropout: Dropout,
    dropatt: Dropout,
    n_head: usize,
    d_head: usize,
    scale: f64,
}

impl MultiHeadAttn {
    pub fn new(d_model: usize, config: &FftConfig, vb: VarBuilder) -> Result<Self> {
        let inner = config.n_heads * config.d_head;
        Ok(Self {
            qkv_net: linear(d_model, 3 * inner, vb.pp("qkv_net"))?,
            o_net: linear_no_bias(inner, d_model, vb.pp("o_net"))?,
            layer_norm: layer_norm(d_model, 1e-5, vb.pp("layer_norm"))?,
            dropout: Dropout::new(config.dropout),
            dropatt: Dropout::new(config.dropatt),
            n_head: config.n_heads,
            d_head: config.d_head,
            scale: 1.0 / (config.d_head as f64).sqrt(),
        })
    }

    /// `x` is `(batch, len, d_model)`, `key_mask` is `(batch, len)` with 1 for
    /// keys that may be attended to.
    pub fn forward(&self, x: &Tensor, key_mask: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, len, _) = x.dims3()?;
        let inner = self.n_head * self.d_head;

        let qkv = self.qkv_net.forward(x)?;
        let split = |index: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, index * inner, inner)?
                .reshape((batch, len, self.n_head, self.d_head))?
                .transpose(1, 2)?
                .contiguous()
        };
        let (q, k, v) = (split(0)?, split(1)?, split(2)?);

        // Large negative bias on padded keys; finite so that empty samples stay NaN-free.
        let bias = ((key_mask.to_dtype(DType::F32)? - 1.0)? * 1e9)?
            .reshape((batch, 1, 1, len))?;
        let scores = ((q.matmul(&k.t()?)? * self.scale)?).broadcast_add(&bias)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let probs = self.dropatt.forward(&probs, train)?;

        let attn = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, len, inner))?;
        let attn = self.dropout.forward(&self.o_net.forward(&attn)?, train)?;
        self.layer_norm.forward(&(x + attn)?)
    }
}

/// Post-norm position-wise feed-forward built from two convolutions.
#[derive(Debug)]
pub struct PositionwiseConvFF {
    conv_in: Conv1d,
    conv_out: Conv1d,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl PositionwiseConvFF {
    pub fn new(d_model: usize, config: &FftConfig, vb: VarBuilder) -> Result<Self> {
        let conv_config = Conv1dConfig {
            padding: config.conv1d_kernel_size / 2,
            ..Default::default()
        };
        let core = vb.pp("CoreNet");
        Ok(Self {
            conv_in: conv1d(
                d_model,
                config.conv1d_filter_size,
                config.conv1d_kernel_size,
                conv_config,
                core.pp("0"),
            )?,
            conv_out: conv1d(
                config.conv1d_filter_size,
                d_model,
                config.conv1d_kernel_size,
                conv_config,
                core.pp("2"),
            )?,
            layer_norm: layer_norm(d_model, 1e-5, vb.pp("layer_norm"))?,
            dropout: Dropout::new(config.dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let core = x.transpose(1, 2)?.contiguous()?;
        let core = self.conv_in.forward(&core)?.relu()?;
        let core = self.conv_out.forward(&core)?.transpose(1, 2)?;
        let core = self.dropout.forward(&core, train)?;
        self.layer_norm.forward(&(x + core)?)
    }
}

/// Attention followed by the conv feed-forward, both masked.
#[derive(Debug)]
pub struct TransformerLayer {
    dec_attn: MultiHeadAttn,
    pos_ff: PositionwiseConvFF,
}

impl TransformerLayer {
    pub fn new(d_model: usize, config: &FftConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dec_attn: MultiHeadAttn::new(d_model, config, vb.pp("dec_attn"))?,
            pos_ff: PositionwiseConvFF::new(d_model, config, vb.pp("pos_ff"))?,
        })
    }

    /// `mask` is `(batch, len, 1)`.
    pub fn forward(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let key_mask = mask.squeeze(D::Minus1)?;
        let out = self
            .dec_attn
            .forward(x, &key_mask, train)?
            .broadcast_mul(mask)?;
        self.pos_ff.forward(&out, train)?.broadcast_mul(mask)
    }
}

/// Stack of [`TransformerLayer`]s with sinusoidal positions.
///
/// Built with a word embedding it acts as the token encoder; without one it
/// consumes already-embedded frames and acts as the decoder.
#[derive(Debug)]
pub struct FfTransformer {
    word_emb: Option<Embedding>,
    padding_idx: u32,
    pos_emb: PositionalEmbedding,
    dropemb: Dropout,
    layers: Vec<TransformerLayer>,
}

impl FfTransformer {
    /// Encoder with a `n_symbols x d_model` embedding table.
    pub fn encoder(
        n_symbols: usize,
        padding_idx: u32,
        d_model: usize,
        config: &FftConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let word_emb = embedding(n_symbols, d_model, vb.pp("word_emb"))?;
        Self::build(Some(word_emb), padding_idx, d_model, config, vb)
    }

    /// Decoder over `(batch, frames, d_model)` inputs.
    pub fn decoder(d_model: usize, config: &FftConfig, vb: VarBuilder) -> Result<Self> {
        Self::build(None, 0, d_model, config, vb)
    }

    fn build(
        word_emb: Option<Embedding>,
        padding_idx: u32,
        d_model: usize,
        config: &FftConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb_layers = vb.pp("layers");
        let layers = (0..config.n_layers)
            .map(|i| TransformerLayer::new(d_model, config, vb_layers.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            word_emb,
            padding_idx,
            pos_emb: PositionalEmbedding::new(d_model, vb.device())?,
            dropemb: Dropout::new(config.dropemb),
            layers,
        })
    }

    /// Run the layers over embedded input `(batch, len, d_model)` and its
    /// `(batch, len, 1)` mask.
    fn run(
        &self,
        input: &Tensor,
        mask: &Tensor,
        conditioning: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_, len, _) = input.dims3()?;
        let pos = self.pos_emb.forward(len)?.broadcast_mul(mask)?;
        let mut out = input.broadcast_add(&pos)?;
        if let Some(conditioning) = conditioning {
            out = out.broadcast_add(conditioning)?;
        }
        let mut out = self.dropemb.forward(&out, train)?;
        for layer in &self.layers {
            out = layer.forward(&out, mask, train)?;
        }
        Ok(out)
    }
}

impl TokenEncoder for FfTransformer {
    fn embed_tokens(&self, tokens: &Tensor) -> Result<Tensor> {
        match &self.word_emb {
            Some(word_emb) => word_emb.forward(tokens),
            None => candle_core::bail!("transformer was built without a word embedding"),
        }
    }

    fn encode(
        &self,
        tokens: &Tensor,
        conditioning: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let input = self.embed_tokens(tokens)?;
        let mask = mask_from_tokens(tokens, self.padding_idx)?.unsqueeze(2)?;
        let out = self.run(&input, &mask, conditioning, train)?;
        Ok((out, mask))
    }
}

impl FrameDecoder for FfTransformer {
    fn decode(&self, frames: &Tensor, lens: &[u32], train: bool) -> Result<(Tensor, Tensor)> {
        let (_, len, _) = frames.dims3()?;
        let mask = mask_from_lens(lens, len, frames.device())?.unsqueeze(2)?;
        let out = self.run(frames, &mask, None, train)?;
        Ok((out, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn config() -> FftConfig {
        FftConfig {
            n_layers: 2,
            n_heads: 2,
            d_head: 4,
            conv1d_kernel_size: 3,
            conv1d_filter_size: 12,
            ..Default::default()
        }
    }

    #[test]
    fn test_positional_embedding() {
        let device = Device::Cpu;
        let pos = PositionalEmbedding::new(8, &device).unwrap();
        let emb = pos.forward(5).unwrap();
        assert_eq!(emb.dims(), &[1, 5, 8]);

        // Position 0: sin terms are 0, cos terms are 1.
        let first = emb.squeeze(0).unwrap().to_vec2::<f32>().unwrap()[0].clone();
        assert_eq!(&first[..4], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(&first[4..], &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_encoder_masks_padding() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = FfTransformer::encoder(10, 0, 8, &config(), vb).unwrap();

        let tokens = Tensor::new(&[[3u32, 4, 5, 0], [1, 2, 0, 0]], &device).unwrap();
        let (out, mask) = encoder.encode(&tokens, None, false).unwrap();
        assert_eq!(out.dims(), &[2, 4, 8]);
        assert_eq!(mask.dims(), &[2, 4, 1]);

        let padded = out.get(1).unwrap().narrow(0, 2, 2).unwrap();
        let total = padded.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_conditioning_changes_output() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = FfTransformer::encoder(10, 0, 8, &config(), vb).unwrap();

        let tokens = Tensor::new(&[[3u32, 4, 5]], &device).unwrap();
        let conditioning = Tensor::ones((1, 1, 8), DType::F32, &device).unwrap();
        let (plain, _) = encoder.encode(&tokens, None, false).unwrap();
        let (conditioned, _) = encoder.encode(&tokens, Some(&conditioning), false).unwrap();
        let diff = (plain - conditioned)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_decoder_uses_lengths() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let decoder = FfTransformer::decoder(8, &config(), vb).unwrap();
        assert!(decoder.embed_tokens(&Tensor::new(&[[1u32]], &device).unwrap()).is_err());

        let frames = Tensor::randn(0f32, 1.0, (2, 6, 8), &device).unwrap();
        let (out, mask) = decoder.decode(&frames, &[6, 3], false).unwrap();
        assert_eq!(out.dims(), &[2, 6, 8]);
        let valid = mask.squeeze(2).unwrap().sum(1).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(valid, vec![6.0, 3.0]);
    }

    #[test]
    fn test_empty_sample_has_no_nan() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let decoder = FfTransformer::decoder(8, &config(), vb).unwrap();

        let frames = Tensor::randn(0f32, 1.0, (2, 4, 8), &device).unwrap();
        let (out, _) = decoder.decode(&frames, &[4, 0], false).unwrap();
        let values = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
