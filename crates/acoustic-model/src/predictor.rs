//! Temporal predictors for duration, pitch and energy.

use candle_core::{Result, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, Dropout, LayerNorm, Linear, Module, VarBuilder, conv1d, layer_norm,
    linear,
};

use crate::config::PredictorConfig;

/// Conv1d with `same` padding, ReLU, LayerNorm over channels and dropout.
#[derive(Debug)]
pub struct ConvReluNorm {
    conv: Conv1d,
    norm: LayerNorm,
    dropout: Dropout,
}

impl ConvReluNorm {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = Conv1dConfig {
            padding: kernel_size / 2,
            ..Default::default()
        };
        let conv = conv1d(in_channels, out_channels, kernel_size, config, vb.pp("conv"))?;
        let norm = layer_norm(out_channels, 1e-5, vb.pp("norm"))?;
        Ok(Self {
            conv,
            norm,
            dropout: Dropout::new(dropout),
        })
    }

    /// `(batch, channels, len)` in, `(batch, out_channels, len)` out.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?.relu()?;
        let x = self
            .norm
            .forward(&x.transpose(1, 2)?.contiguous()?)?
            .transpose(1, 2)?;
        self.dropout.forward(&x, train)
    }
}

/// Conv stack plus linear projection predicting `n_predictions` values per token.
#[derive(Debug)]
pub struct TemporalPredictor {
    layers: Vec<ConvReluNorm>,
    fc: Linear,
    n_predictions: usize,
}

impl TemporalPredictor {
    pub fn new(
        input_size: usize,
        config: &PredictorConfig,
        n_predictions: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb_layers = vb.pp("layers");
        let layers = (0..config.n_layers)
            .map(|i| {
                let in_channels = if i == 0 { input_size } else { config.filter_size };
                ConvReluNorm::new(
                    in_channels,
                    config.filter_size,
                    config.kernel_size,
                    config.dropout,
                    vb_layers.pp(i),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let fc = linear(config.filter_size, n_predictions, vb.pp("fc"))?;

        Ok(Self {
            layers,
            fc,
            n_predictions,
        })
    }

    /// Number of values predicted per token.
    pub fn n_predictions(&self) -> usize {
        self.n_predictions
    }

    /// Predict from `(batch, tokens, dim)` features and a `(batch, tokens, 1)`
    /// mask. Output is `(batch, tokens, n_predictions)`, zero at padding.
    pub fn forward(&self, enc_out: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = enc_out.broadcast_mul(mask)?.transpose(1, 2)?.contiguous()?;
        for layer in &self.layers {
            x = layer.forward(&x, train)?;
        }
        let out = self.fc.forward(&x.transpose(1, 2)?.contiguous()?)?;
        out.broadcast_mul(mask)
    }
}
