//! Core data types shared between the model and its callers.

use serde::{Deserialize, Serialize};

use crate::error::{TtsError, TtsResult};

/// Pipeline checkpoint at which prosody hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    /// Durations and pitch are final, pitch not yet embedded.
    AfterPitch,
    /// Energy is final, not yet embedded. Pitch is already embedded at this
    /// point, so pitch edits made here do not reach the decoder.
    AfterEnergy,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookStage::AfterPitch => write!(f, "after_pitch"),
            HookStage::AfterEnergy => write!(f, "after_energy"),
        }
    }
}

/// Per-token prosody of one utterance.
///
/// Used as externally supplied side data ("existing" values from a previous
/// synthesis) and returned to callers so a later re-synthesis can reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProsodyCurves {
    /// Duration of each token in frames.
    pub durations: Vec<f32>,
    /// Normalised pitch, formant-major: `pitch[formant][token]`.
    pub pitch: Vec<Vec<f32>>,
    /// Energy of each token. Empty when the model has no energy conditioning.
    #[serde(default)]
    pub energy: Vec<f32>,
}

impl ProsodyCurves {
    /// Curves with a single pitch formant.
    pub fn single_formant(durations: Vec<f32>, pitch: Vec<f32>, energy: Vec<f32>) -> Self {
        Self {
            durations,
            pitch: vec![pitch],
            energy,
        }
    }

    /// Number of tokens covered by the durations.
    pub fn num_tokens(&self) -> usize {
        self.durations.len()
    }

    /// Check that every curve covers `num_tokens` tokens with finite values.
    ///
    /// `energy_required` demands a non-empty energy curve.
    pub fn validate(
        &self,
        num_tokens: usize,
        num_formants: usize,
        energy_required: bool,
    ) -> TtsResult<()> {
        if num_tokens == 0 {
            return Err(TtsError::invalid_input("prosody curves cover no tokens"));
        }
        check_curve("durations", &self.durations, num_tokens)?;
        if self.durations.iter().any(|&d| d < 0.0) {
            return Err(TtsError::invalid_input("durations must be non-negative"));
        }

        if self.pitch.len() != num_formants {
            return Err(TtsError::invalid_input(format!(
                "pitch has {} formants, model expects {num_formants}",
                self.pitch.len()
            )));
        }
        for formant in &self.pitch {
            check_curve("pitch", formant, num_tokens)?;
        }

        if energy_required {
            check_curve("energy", &self.energy, num_tokens)?;
        }
        Ok(())
    }
}

fn check_curve(name: &str, values: &[f32], expected: usize) -> TtsResult<()> {
    if values.len() != expected {
        return Err(TtsError::invalid_input(format!(
            "{name} has {} values, expected {expected}",
            values.len()
        )));
    }
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(TtsError::invalid_input(format!(
            "{name} holds a non-finite value at token {pos}"
        )));
    }
    Ok(())
}

/// Mutable view handed to prosody hooks.
///
/// All per-token arrays are batch-major. `energy` is only populated at
/// [`HookStage::AfterEnergy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProsodyBundle {
    /// `durations[batch][token]`.
    pub durations: Vec<Vec<f32>>,
    /// `pitch[batch][formant][token]`.
    pub pitch: Vec<Vec<Vec<f32>>>,
    /// `energy[batch][token]`.
    pub energy: Option<Vec<Vec<f32>>>,
    /// Input token ids, `tokens[batch][token]`.
    pub tokens: Vec<Vec<u32>>,
    /// Cleaned input text, when the caller provided it.
    pub text: Option<String>,
    /// `true` unless the call was seeded with previously computed prosody.
    pub is_fresh_synth: bool,
}

/// Array dimensions of a [`ProsodyBundle`], used to check hook results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleShape {
    durations: Vec<usize>,
    pitch: Vec<Vec<usize>>,
    energy: Option<Vec<usize>>,
}

impl ProsodyBundle {
    /// Dimensions of every array in the bundle.
    pub fn shape(&self) -> BundleShape {
        BundleShape {
            durations: self.durations.iter().map(Vec::len).collect(),
            pitch: self
                .pitch
                .iter()
                .map(|row| row.iter().map(Vec::len).collect())
                .collect(),
            energy: self
                .energy
                .as_ref()
                .map(|rows| rows.iter().map(Vec::len).collect()),
        }
    }

    /// Whether every value in the bundle is finite.
    pub fn is_finite(&self) -> bool {
        let durations = self.durations.iter().flatten();
        let pitch = self.pitch.iter().flatten().flatten();
        let energy = self.energy.iter().flatten().flatten();
        durations.chain(pitch).chain(energy).all(|v| v.is_finite())
    }
}
