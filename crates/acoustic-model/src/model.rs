//! FastPitch model: training forward pass and inference.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, Embedding, Linear, VarBuilder, VarMap, conv1d, embedding, linear,
};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, warn};
use tts_core::{
    HookStage, InferenceConfig, ProsodyCurves, ProsodyHooks, TtsError, TtsResult,
};

use crate::alignment::{AlignmentSearch, MonotonicSearch, binarize_attention};
use crate::attention::ConvAttention;
use crate::averager::average_over_durations;
use crate::config::FastPitchConfig;
use crate::mask::mask_from_lens;
use crate::predictor::TemporalPredictor;
use crate::prosody::{ProsodySource, bundle_from_tensors, cube_to_tensor, rows_to_tensor};
use crate::regulator::regulate_len;
use crate::splice::SpliceBounds;
use crate::stats::PitchStats;
use crate::traits::{AlignmentInputs, AlignmentScorer, FrameDecoder, TokenEncoder};
use crate::transformer::FfTransformer;

/// One training batch.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    /// `(batch, tokens)` u32 ids.
    pub tokens: Tensor,
    /// Valid tokens per sample.
    pub input_lens: Vec<u32>,
    /// Target mel, `(batch, n_mel, frames)`.
    pub mel: Tensor,
    /// Valid frames per sample.
    pub mel_lens: Vec<u32>,
    /// Dense normalised pitch, `(batch, formants, frames)`, zero where unvoiced.
    pub pitch: Tensor,
    /// Dense energy, `(batch, frames)`. Required when energy conditioning is on.
    pub energy: Option<Tensor>,
    /// `(batch,)` u32 speaker ids.
    pub speakers: Option<Tensor>,
    /// `(batch, frames, tokens)` alignment prior.
    pub attn_prior: Option<Tensor>,
}

/// Switches for [`FastPitch::forward`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardOptions {
    /// Condition on the averaged pitch target instead of the prediction.
    pub use_gt_pitch: bool,
    pub pace: f32,
    pub max_duration: f32,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            use_gt_pitch: true,
            pace: 1.0,
            max_duration: 75.0,
        }
    }
}

/// Everything the training losses need.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    /// Predicted mel, `(batch, frames, n_mel)`.
    pub mel: Tensor,
    /// `(batch, frames, 1)` decoder mask.
    pub dec_mask: Tensor,
    pub dur_pred: Tensor,
    pub log_dur_pred: Tensor,
    /// `(batch, formants, tokens)`.
    pub pitch_pred: Tensor,
    /// `(batch, formants, tokens)`.
    pub pitch_tgt: Tensor,
    pub energy_pred: Option<Tensor>,
    /// `ln(1 + mean energy)` per token.
    pub energy_tgt: Option<Tensor>,
    pub attn_soft: Tensor,
    pub attn_hard: Tensor,
    /// `(batch, tokens)` durations read off the hard alignment.
    pub attn_hard_dur: Tensor,
    pub attn_logprob: Tensor,
}

/// An inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// `(batch, tokens)` u32 ids.
    pub tokens: Tensor,
    pub speaker: Option<u32>,
    pub config: InferenceConfig,
    /// Prosody of a previous synthesis to reuse.
    pub existing: Option<ProsodyCurves>,
    /// Token sequence `existing` was computed for, when it differs from `tokens`.
    pub old_tokens: Option<Vec<u32>>,
    /// Cleaned input text, passed through to hooks.
    pub text: Option<String>,
}

impl InferenceRequest {
    pub fn new(tokens: Tensor) -> Self {
        Self {
            tokens,
            speaker: None,
            config: InferenceConfig::default(),
            existing: None,
            old_tokens: None,
            text: None,
        }
    }

    /// Single-utterance request from raw ids.
    pub fn from_ids(ids: &[u32], device: &Device) -> TtsResult<Self> {
        let tokens = Tensor::new(ids, device)?.unsqueeze(0)?;
        Ok(Self::new(tokens))
    }

    pub fn with_speaker(mut self, speaker: u32) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_pace(mut self, pace: f32) -> Self {
        self.config.pace = pace;
        self
    }

    pub fn with_config(mut self, config: InferenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Reuse prosody from a previous synthesis of the same tokens.
    pub fn with_existing(mut self, curves: ProsodyCurves) -> Self {
        self.existing = Some(curves);
        self
    }

    /// Reuse prosody from a previous synthesis of `old_tokens`, keeping only
    /// the unchanged edges.
    pub fn with_edit(mut self, curves: ProsodyCurves, old_tokens: Vec<u32>) -> Self {
        self.existing = Some(curves);
        self.old_tokens = Some(old_tokens);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Result of [`FastPitch::infer`].
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// `(batch, n_mel, frames)`.
    pub mel: Tensor,
    pub mel_lens: Vec<u32>,
    /// `(batch, tokens)` durations before pace is applied.
    pub durations: Tensor,
    /// `(batch, formants, tokens)` normalised pitch.
    pub pitch: Tensor,
    /// `(batch, tokens)`; absent without energy conditioning.
    pub energy: Option<Tensor>,
    /// Retained prefix/suffix boundaries of a partial re-synthesis.
    pub splice_start: Option<usize>,
    pub splice_end: Option<usize>,
    /// Whether supplied prosody was used rather than discarded.
    pub used_supplied: bool,
    pitch_stats: Option<PitchStats>,
}

impl InferenceOutput {
    /// Prosody of one utterance, in the form accepted back as side data.
    pub fn prosody(&self, index: usize) -> TtsResult<ProsodyCurves> {
        let durations = self.durations.get(index)?.to_vec1::<f32>()?;
        let pitch = self.pitch.get(index)?.to_vec2::<f32>()?;
        let energy = match &self.energy {
            Some(energy) => energy.get(index)?.to_vec1::<f32>()?,
            None => Vec::new(),
        };
        Ok(ProsodyCurves {
            durations,
            pitch,
            energy,
        })
    }

    /// Pitch of one utterance in Hz, when the model carries pitch statistics.
    pub fn pitch_hz(&self, index: usize) -> TtsResult<Option<Vec<Vec<f32>>>> {
        let Some(stats) = self.pitch_stats else {
            return Ok(None);
        };
        let pitch = self.pitch.get(index)?.to_vec2::<f32>()?;
        Ok(Some(pitch.iter().map(|f| stats.denormalize(f)).collect()))
    }

    /// Total frames per utterance.
    pub fn num_frames(&self) -> &[u32] {
        &self.mel_lens
    }
}

/// FastPitch acoustic model.
#[derive(Debug)]
pub struct FastPitch {
    encoder: Box<dyn TokenEncoder>,
    decoder: Box<dyn FrameDecoder>,
    aligner: Box<dyn AlignmentScorer>,
    search: Box<dyn AlignmentSearch>,
    speaker_emb: Option<Embedding>,
    duration_predictor: TemporalPredictor,
    pitch_predictor: TemporalPredictor,
    energy_predictor: Option<TemporalPredictor>,
    pitch_emb: Conv1d,
    energy_emb: Option<Conv1d>,
    proj: Linear,
    pitch_stats: OnceCell<PitchStats>,
    config: FastPitchConfig,
    device: Device,
}

impl FastPitch {
    /// Load weights from a safetensors checkpoint.
    ///
    /// Scalar `pitch_mean` / `pitch_std` tensors, when present and not both
    /// zero, become the model's pitch statistics.
    #[instrument(skip(config, device), fields(path = %path.as_ref().display()))]
    pub fn load(
        path: impl AsRef<Path>,
        config: FastPitchConfig,
        device: &Device,
    ) -> TtsResult<Self> {
        let path = path.as_ref();
        info!("Loading FastPitch weights from {}", path.display());

        let tensors =
            candle_core::safetensors::load(path, device).map_err(|e| TtsError::ModelLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let stats = match (tensors.get("pitch_mean"), tensors.get("pitch_std")) {
            (Some(mean), Some(std)) => match (scalar(mean)?, scalar(std)?) {
                // Zero buffers: preprocessing never filled them in.
                (0.0, 0.0) => {
                    warn!("checkpoint pitch statistics are unset, pitch stays normalised");
                    None
                }
                (mean, std) => Some(PitchStats::new(mean, std)?),
            },
            _ => None,
        };

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = Self::from_vb(vb, config).map_err(|e| match e {
            TtsError::Tensor(err) => TtsError::ModelLoad {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
            other => other,
        })?;
        if let Some(stats) = stats {
            model.set_pitch_stats(stats)?;
        }
        Ok(model)
    }

    /// Randomly initialised model, deterministic for a given `seed`.
    ///
    /// The returned [`VarMap`] owns the weights and can be saved as a
    /// checkpoint.
    pub fn new_random(
        config: FastPitchConfig,
        device: &Device,
        seed: u64,
    ) -> TtsResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::from_vb(vb, config)?;
        reinitialize(&varmap, seed)?;
        Ok((model, varmap))
    }

    /// Build the default sub-networks from `vb`.
    pub fn from_vb(vb: VarBuilder, config: FastPitchConfig) -> TtsResult<Self> {
        config.validate()?;
        let d_model = config.symbols_embedding_dim;
        let encoder = FfTransformer::encoder(
            config.n_symbols,
            config.padding_idx,
            d_model,
            &config.encoder,
            vb.pp("encoder"),
        )?;
        let decoder = FfTransformer::decoder(d_model, &config.decoder, vb.pp("decoder"))?;
        let aligner = ConvAttention::new(
            config.n_mel_channels,
            d_model,
            config.n_att_channels,
            vb.pp("attention"),
        )?;
        Self::from_components(
            config,
            Box::new(encoder),
            Box::new(decoder),
            Box::new(aligner),
            vb,
        )
    }

    /// Build around caller-provided encoder, decoder and attention; the
    /// predictors, embeddings and projection come from `vb`.
    pub fn from_components(
        config: FastPitchConfig,
        encoder: Box<dyn TokenEncoder>,
        decoder: Box<dyn FrameDecoder>,
        aligner: Box<dyn AlignmentScorer>,
        vb: VarBuilder,
    ) -> TtsResult<Self> {
        config.validate()?;
        let d_model = config.symbols_embedding_dim;
        let formants = config.pitch_conditioning_formants;

        let speaker_emb = if config.n_speakers > 1 {
            Some(embedding(config.n_speakers, d_model, vb.pp("speaker_emb"))?)
        } else {
            None
        };

        let duration_predictor =
            TemporalPredictor::new(d_model, &config.duration_predictor, 1, vb.pp("duration_predictor"))?;
        let pitch_predictor =
            TemporalPredictor::new(d_model, &config.pitch_predictor, formants, vb.pp("pitch_predictor"))?;
        let pitch_emb = conv1d(
            formants,
            d_model,
            config.pitch_embedding_kernel_size,
            same_padding(config.pitch_embedding_kernel_size),
            vb.pp("pitch_emb"),
        )?;

        let (energy_predictor, energy_emb) = if config.energy_conditioning {
            let predictor =
                TemporalPredictor::new(d_model, &config.energy_predictor, 1, vb.pp("energy_predictor"))?;
            let emb = conv1d(
                1,
                d_model,
                config.energy_embedding_kernel_size,
                same_padding(config.energy_embedding_kernel_size),
                vb.pp("energy_emb"),
            )?;
            (Some(predictor), Some(emb))
        } else {
            (None, None)
        };

        let proj = linear(d_model, config.n_mel_channels, vb.pp("proj"))?;

        info!(
            "FastPitch ready: {} symbols, {} dims, {} mel channels, {} speakers",
            config.n_symbols, d_model, config.n_mel_channels, config.n_speakers
        );

        Ok(Self {
            encoder,
            decoder,
            aligner,
            search: Box::new(MonotonicSearch::new(config.mas_width)),
            speaker_emb,
            duration_predictor,
            pitch_predictor,
            energy_predictor,
            pitch_emb,
            energy_emb,
            proj,
            pitch_stats: OnceCell::new(),
            device: vb.device().clone(),
            config,
        })
    }

    /// Replace the alignment search.
    pub fn with_search(mut self, search: Box<dyn AlignmentSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn config(&self) -> &FastPitchConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Pitch statistics, if known.
    pub fn pitch_stats(&self) -> Option<PitchStats> {
        self.pitch_stats.get().copied()
    }

    /// Record pitch statistics. They can only be set once.
    pub fn set_pitch_stats(&self, stats: PitchStats) -> TtsResult<()> {
        self.pitch_stats
            .set(stats)
            .map_err(|_| TtsError::config("pitch statistics are already set"))
    }

    /// Training pass conditioned on the ground-truth mel, pitch and energy.
    ///
    /// Fails with [`TtsError::AlignmentMismatch`] if the hard alignment of
    /// any sample does not cover exactly its mel length.
    #[instrument(skip_all)]
    pub fn forward(&self, batch: &TrainingBatch, options: &ForwardOptions) -> TtsResult<TrainingOutput> {
        let (batch_size, tokens) = batch.tokens.dims2()?;
        let (_, _, mel_max_len) = batch.mel.dims3()?;
        if batch.input_lens.len() != batch_size || batch.mel_lens.len() != batch_size {
            return Err(TtsError::invalid_input(format!(
                "batch of {batch_size} needs {batch_size} input and mel lengths"
            )));
        }

        let conditioning = self.speaker_conditioning(batch.speakers.as_ref())?;
        let (enc_out, enc_mask) = self.encoder.encode(&batch.tokens, conditioning.as_ref(), true)?;

        let log_dur_pred = self
            .duration_predictor
            .forward(&enc_out, &enc_mask, true)?
            .squeeze(2)?;
        let dur_pred = (log_dur_pred.exp()? - 1.0)?.clamp(0f32, options.max_duration)?;
        let pitch_pred = self
            .pitch_predictor
            .forward(&enc_out, &enc_mask, true)?
            .transpose(1, 2)?
            .contiguous()?;

        // Alignment
        let text_emb = self.encoder.embed_tokens(&batch.tokens)?;
        let key_mask = mask_from_lens(&batch.input_lens, tokens, &self.device)?;
        let (attn_soft, attn_logprob) = self.aligner.score(AlignmentInputs {
            mel: &batch.mel,
            text_emb: &text_emb,
            mel_lens: &batch.mel_lens,
            key_mask: &key_mask,
            attn_prior: batch.attn_prior.as_ref(),
        })?;
        let attn_hard = binarize_attention(
            self.search.as_ref(),
            &attn_soft,
            &batch.input_lens,
            &batch.mel_lens,
        )?;
        let attn_hard_dur = attn_hard.sum(2)?.squeeze(1)?;
        check_durations(&attn_hard_dur, &batch.mel_lens)?;
        let dur_tgt = &attn_hard_dur;

        // Pitch
        let pitch_tgt = average_over_durations(&batch.pitch, dur_tgt)?;
        let pitch_cond = if options.use_gt_pitch { &pitch_tgt } else { &pitch_pred };
        let mut enc_out = (enc_out + self.embed_pitch(pitch_cond)?)?;

        // Energy
        let (energy_pred, energy_tgt) = match (&self.energy_predictor, &self.energy_emb) {
            (Some(predictor), Some(emb)) => {
                let energy_pred = predictor.forward(&enc_out, &enc_mask, true)?.squeeze(2)?;
                let dense = batch.energy.as_ref().ok_or_else(|| {
                    TtsError::invalid_input("energy targets are required with energy conditioning")
                })?;
                let energy_tgt =
                    (average_over_durations(&dense.unsqueeze(1)?, dur_tgt)? + 1.0)?.log()?;
                enc_out = (enc_out + embed(emb, &energy_tgt)?)?;
                (Some(energy_pred), Some(energy_tgt.squeeze(1)?))
            }
            _ => (None, None),
        };

        let (frames, dec_lens) = regulate_len(dur_tgt, &enc_out, options.pace, Some(mel_max_len))?;
        let (dec_out, dec_mask) = self.decoder.decode(&frames, &dec_lens, true)?;
        let mel = self.proj.forward(&dec_out)?;

        Ok(TrainingOutput {
            mel,
            dec_mask,
            dur_pred,
            log_dur_pred,
            pitch_pred,
            pitch_tgt,
            energy_pred,
            energy_tgt,
            attn_soft,
            attn_hard,
            attn_hard_dur,
            attn_logprob,
        })
    }

    /// Synthesise mel frames.
    ///
    /// Supplied prosody that fails validation or breaks anywhere in the
    /// pipeline is dropped and the call is re-run on self-predicted prosody.
    #[instrument(skip_all, fields(tokens = ?request.tokens.dims()))]
    pub fn infer(&self, request: &InferenceRequest, hooks: &ProsodyHooks) -> TtsResult<InferenceOutput> {
        request.config.validate()?;
        let token_rows = request.tokens.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        let conditioning = match request.speaker {
            Some(id) => {
                let ids = Tensor::full(id, token_rows.len(), &self.device)?;
                self.speaker_conditioning(Some(&ids))?
            }
            None => None,
        };
        let (enc_out, enc_mask) = self.encoder.encode(&request.tokens, conditioning.as_ref(), false)?;

        let source = ProsodySource::resolve(
            request.existing.as_ref(),
            request.old_tokens.as_deref(),
            &token_rows,
            self.config.pitch_conditioning_formants,
            self.config.energy_conditioning,
        );

        if source.is_supplied() {
            match self.synthesize(&source, &enc_out, &enc_mask, &token_rows, request, hooks) {
                Ok(output) => return Ok(output),
                Err(err) => warn!(error = %err, "supplied prosody failed, using self-predicted prosody"),
            }
        }
        self.synthesize(&ProsodySource::SelfPredicted, &enc_out, &enc_mask, &token_rows, request, hooks)
    }

    /// One pass of the inference pipeline from encoder output onwards.
    fn synthesize(
        &self,
        source: &ProsodySource,
        enc_out: &Tensor,
        enc_mask: &Tensor,
        token_rows: &[Vec<u32>],
        request: &InferenceRequest,
        hooks: &ProsodyHooks,
    ) -> TtsResult<InferenceOutput> {
        let limits = &request.config;
        let is_fresh = !source.is_supplied();
        let splice = match source {
            ProsodySource::Supplied(validated) => validated.splice,
            ProsodySource::SelfPredicted => None,
        };

        let (mut durations, mut pitch) = match source {
            ProsodySource::Supplied(validated) => match validated.splice {
                None => (
                    rows_to_tensor(&[validated.curves.durations.clone()], &self.device)?,
                    cube_to_tensor(&[validated.curves.pitch.clone()], &self.device)?,
                ),
                Some(bounds) => {
                    let (durations, pitch) =
                        self.predict_duration_pitch(enc_out, enc_mask, limits)?;
                    (
                        splice_rows(&durations, &bounds, &[validated.curves.durations.as_slice()])?,
                        splice_cube(&pitch, &bounds, &validated.curves.pitch)?,
                    )
                }
            },
            ProsodySource::SelfPredicted => self.predict_duration_pitch(enc_out, enc_mask, limits)?,
        };

        if !hooks.is_empty() {
            let bundle = bundle_from_tensors(
                &durations,
                &pitch,
                None,
                token_rows,
                request.text.as_deref(),
                is_fresh,
            )?;
            let bundle = hooks.run(HookStage::AfterPitch, bundle)?;
            durations = rows_to_tensor(&bundle.durations, &self.device)?;
            pitch = cube_to_tensor(&bundle.pitch, &self.device)?;
        }

        let mut enc_out = (enc_out + self.embed_pitch(&pitch)?)?;

        let mut energy = match &self.energy_predictor {
            Some(predictor) => {
                let fresh = predictor.forward(&enc_out, enc_mask, false)?.squeeze(2)?;
                Some(match source {
                    ProsodySource::Supplied(validated) => match validated.splice {
                        None => rows_to_tensor(&[validated.curves.energy.clone()], &self.device)?,
                        Some(bounds) => {
                            splice_rows(&fresh, &bounds, &[validated.curves.energy.as_slice()])?
                        }
                    },
                    ProsodySource::SelfPredicted => fresh,
                })
            }
            None => None,
        };

        if !hooks.is_empty() {
            let bundle = bundle_from_tensors(
                &durations,
                &pitch,
                energy.as_ref(),
                token_rows,
                request.text.as_deref(),
                is_fresh,
            )?;
            let bundle = hooks.run(HookStage::AfterEnergy, bundle)?;
            durations = rows_to_tensor(&bundle.durations, &self.device)?;
            if let Some(rows) = &bundle.energy {
                energy = Some(rows_to_tensor(rows, &self.device)?);
            }
        }

        if let (Some(energy), Some(emb)) = (&energy, &self.energy_emb) {
            enc_out = (enc_out + embed(emb, &energy.unsqueeze(1)?)?)?;
        }

        let (frames, mel_lens) = regulate_len(&durations, &enc_out, limits.pace, None)?;
        let (batch, num_frames, _) = frames.dims3()?;
        debug!(num_frames, ?mel_lens, "length regulated");

        let mel = if num_frames == 0 {
            Tensor::zeros((batch, self.config.n_mel_channels, 0), DType::F32, &self.device)?
        } else {
            let (dec_out, _) = self.decoder.decode(&frames, &mel_lens, false)?;
            self.proj.forward(&dec_out)?.transpose(1, 2)?.contiguous()?
        };

        Ok(InferenceOutput {
            mel,
            mel_lens,
            durations,
            pitch,
            energy,
            splice_start: splice.and_then(|s| s.start()),
            splice_end: splice.and_then(|s| s.end()),
            used_supplied: !is_fresh,
            pitch_stats: self.pitch_stats(),
        })
    }

    /// Self-predicted durations `(batch, tokens)` and pitch `(batch, formants, tokens)`.
    fn predict_duration_pitch(
        &self,
        enc_out: &Tensor,
        enc_mask: &Tensor,
        limits: &InferenceConfig,
    ) -> TtsResult<(Tensor, Tensor)> {
        let log_dur = self
            .duration_predictor
            .forward(enc_out, enc_mask, false)?
            .squeeze(2)?;
        let mask = enc_mask.squeeze(2)?;
        let durations = (log_dur.exp()? - 1.0)?
            .clamp(0f32, limits.max_duration)?
            .maximum(limits.min_duration)?
            .mul(&mask)?;

        let pitch = self
            .pitch_predictor
            .forward(enc_out, enc_mask, false)?
            .transpose(1, 2)?
            .contiguous()?
            .clamp(-limits.pitch_clamp, limits.pitch_clamp)?;
        Ok((durations, pitch))
    }

    /// `(batch, formants, tokens)` pitch to `(batch, tokens, dim)`.
    fn embed_pitch(&self, pitch: &Tensor) -> candle_core::Result<Tensor> {
        embed(&self.pitch_emb, pitch)
    }

    fn speaker_conditioning(&self, speakers: Option<&Tensor>) -> TtsResult<Option<Tensor>> {
        let Some(ids) = speakers else {
            return Ok(None);
        };
        let Some(table) = &self.speaker_emb else {
            return Err(TtsError::invalid_input(
                "speaker ids given to a single-speaker model",
            ));
        };
        let ids = ids.to_dtype(DType::U32)?;
        if let Some(&bad) = ids
            .to_vec1::<u32>()?
            .iter()
            .find(|&&id| id as usize >= self.config.n_speakers)
        {
            return Err(TtsError::invalid_input(format!(
                "speaker {bad} outside 0..{}",
                self.config.n_speakers
            )));
        }
        let emb = (table.forward(&ids)?.unsqueeze(1)? * self.config.speaker_emb_weight as f64)?;
        Ok(Some(emb))
    }
}

fn same_padding(kernel_size: usize) -> Conv1dConfig {
    Conv1dConfig {
        padding: (kernel_size - 1) / 2,
        ..Default::default()
    }
}

/// Apply a conv embedding to `(batch, channels, tokens)`, returning
/// `(batch, tokens, dim)`.
fn embed(conv: &Conv1d, values: &Tensor) -> candle_core::Result<Tensor> {
    conv.forward(&values.contiguous()?)?.transpose(1, 2)
}

fn scalar(tensor: &Tensor) -> TtsResult<f32> {
    tensor
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?
        .first()
        .copied()
        .ok_or_else(|| TtsError::invalid_input("empty scalar tensor"))
}

fn check_durations(durations: &Tensor, mel_lens: &[u32]) -> TtsResult<()> {
    let sums = durations.sum(1)?.to_vec1::<f32>()?;
    for (sample, (&sum, &expected)) in sums.iter().zip(mel_lens).enumerate() {
        let actual = sum.round() as u32;
        if actual != expected {
            return Err(TtsError::AlignmentMismatch {
                sample,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Splice a `(1, tokens)` tensor with previously computed rows.
fn splice_rows(fresh: &Tensor, bounds: &SpliceBounds, existing: &[&[f32]]) -> TtsResult<Tensor> {
    let mut rows = fresh.to_vec2::<f32>()?;
    if rows.len() != existing.len() {
        return Err(TtsError::invalid_input("splice batch size mismatch"));
    }
    for (row, old) in rows.iter_mut().zip(existing) {
        bounds.apply(row, old)?;
    }
    Ok(rows_to_tensor(&rows, fresh.device())?)
}

/// Splice a `(1, formants, tokens)` tensor with previous formant curves.
fn splice_cube(fresh: &Tensor, bounds: &SpliceBounds, existing: &[Vec<f32>]) -> TtsResult<Tensor> {
    let (_, formants, tokens) = fresh.dims3()?;
    let old: Vec<&[f32]> = existing.iter().map(Vec::as_slice).collect();
    let plane = splice_rows(&fresh.squeeze(0)?, bounds, &old)?;
    Ok(plane.reshape((1, formants, tokens))?)
}

/// Deterministically overwrite every variable: weights uniform in
/// `±1/sqrt(fan_in)`, norm scales one, other vectors zero.
fn reinitialize(varmap: &VarMap, seed: u64) -> TtsResult<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| TtsError::internal("weight map lock poisoned"))?;
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    for name in names {
        let var = &vars[name];
        let dims = var.dims().to_vec();
        let count: usize = dims.iter().product();
        let values: Vec<f32> = if dims.len() >= 2 {
            let fan_in: usize = dims[1..].iter().product();
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
            (0..count).map(|_| rng.gen_range(-bound..bound)).collect()
        } else if name.contains("norm") && name.ends_with("weight") {
            vec![1.0; count]
        } else {
            vec![0.0; count]
        };
        let tensor = Tensor::from_vec(values, dims, var.device())?.to_dtype(var.dtype())?;
        var.set(&tensor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> FastPitch {
        FastPitch::new_random(FastPitchConfig::tiny(), &Device::Cpu, 7).unwrap().0
    }

    #[test]
    fn test_new_random_is_seeded() {
        let a = tiny();
        let b = tiny();
        let request = InferenceRequest::from_ids(&[1, 2, 3], &Device::Cpu).unwrap();
        let out_a = a.infer(&request, &ProsodyHooks::new()).unwrap();
        let out_b = b.infer(&request, &ProsodyHooks::new()).unwrap();
        assert_eq!(
            out_a.durations.to_vec2::<f32>().unwrap(),
            out_b.durations.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_pitch_stats_set_once() {
        let model = tiny();
        assert!(model.pitch_stats().is_none());
        model.set_pitch_stats(PitchStats::new(120.0, 30.0).unwrap()).unwrap();
        assert!(model.set_pitch_stats(PitchStats::new(1.0, 1.0).unwrap()).is_err());
        assert_eq!(model.pitch_stats().unwrap().mean, 120.0);
    }

    #[test]
    fn test_speaker_checks() {
        let model = tiny();
        let request = InferenceRequest::from_ids(&[1, 2], &Device::Cpu)
            .unwrap()
            .with_speaker(0);
        let err = model.infer(&request, &ProsodyHooks::new()).unwrap_err();
        assert!(matches!(err, TtsError::InvalidInput(_)));

        let config = FastPitchConfig {
            n_speakers: 3,
            ..FastPitchConfig::tiny()
        };
        let (model, _) = FastPitch::new_random(config, &Device::Cpu, 1).unwrap();
        let ok = InferenceRequest::from_ids(&[1, 2], &Device::Cpu)
            .unwrap()
            .with_speaker(2);
        assert!(model.infer(&ok, &ProsodyHooks::new()).is_ok());
        let bad = ok.with_speaker(3);
        assert!(model.infer(&bad, &ProsodyHooks::new()).is_err());
    }

    #[test]
    fn test_durations_respect_limits() {
        let model = tiny();
        let request = InferenceRequest::from_ids(&[3, 4, 5, 6], &Device::Cpu).unwrap();
        let out = model.infer(&request, &ProsodyHooks::new()).unwrap();
        let durations = out.durations.to_vec2::<f32>().unwrap();
        assert!(durations[0].iter().all(|&d| (0.25..=75.0).contains(&d)));
        let pitch = out.pitch.to_vec3::<f32>().unwrap();
        assert!(pitch[0][0].iter().all(|&p| (-3.0..=3.0).contains(&p)));
        assert_eq!(out.mel.dims()[1], 8);
        assert_eq!(out.mel.dims()[2], out.mel_lens[0] as usize);
    }

    #[test]
    fn test_check_durations() {
        let durations = Tensor::new(&[[2f32, 3.0], [1.0, 0.0]], &Device::Cpu).unwrap();
        assert!(check_durations(&durations, &[5, 1]).is_ok());
        let err = check_durations(&durations, &[5, 2]).unwrap_err();
        assert!(matches!(
            err,
            TtsError::AlignmentMismatch {
                sample: 1,
                expected: 2,
                actual: 1
            }
        ));
    }
}
