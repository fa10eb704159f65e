//! Prosody resolution for inference.
//!
//! Side data supplied by the caller is validated up front and turned into an
//! explicit [`ProsodySource`]. The model runs the `Supplied` branch first and
//! falls back to `SelfPredicted` if anything on that branch fails.

use candle_core::{Device, Result, Tensor};
use tracing::warn;
use tts_core::{ProsodyBundle, ProsodyCurves, TtsError, TtsResult};

use crate::splice::SpliceBounds;

/// Side data that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProsody {
    pub curves: ProsodyCurves,
    /// Present when the curves belong to an earlier version of the token
    /// sequence and only the unchanged edges should be reused.
    pub splice: Option<SpliceBounds>,
}

/// Where the prosody of an inference call comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProsodySource {
    Supplied(ValidatedProsody),
    SelfPredicted,
}

impl ProsodySource {
    /// Validate optional side data against the batch being synthesised.
    ///
    /// Invalid side data is logged and discarded.
    pub fn resolve(
        existing: Option<&ProsodyCurves>,
        old_tokens: Option<&[u32]>,
        tokens: &[Vec<u32>],
        num_formants: usize,
        energy_required: bool,
    ) -> Self {
        let Some(curves) = existing else {
            return Self::SelfPredicted;
        };
        match validate(curves, old_tokens, tokens, num_formants, energy_required) {
            Ok(validated) => Self::Supplied(validated),
            Err(err) => {
                warn!(error = %err, "ignoring supplied prosody");
                Self::SelfPredicted
            }
        }
    }

    pub fn is_supplied(&self) -> bool {
        matches!(self, Self::Supplied(_))
    }
}

fn validate(
    curves: &ProsodyCurves,
    old_tokens: Option<&[u32]>,
    tokens: &[Vec<u32>],
    num_formants: usize,
    energy_required: bool,
) -> TtsResult<ValidatedProsody> {
    let [new_tokens] = tokens else {
        return Err(TtsError::invalid_input(format!(
            "supplied prosody needs a batch of one, got {}",
            tokens.len()
        )));
    };
    let splice = match old_tokens {
        Some(old) => {
            curves.validate(old.len(), num_formants, energy_required)?;
            Some(SpliceBounds::detect(old, new_tokens))
        }
        None => {
            curves.validate(new_tokens.len(), num_formants, energy_required)?;
            None
        }
    };
    Ok(ValidatedProsody {
        curves: curves.clone(),
        splice,
    })
}

/// Batch-major rows to a `(rows, cols)` tensor.
pub fn rows_to_tensor(rows: &[Vec<f32>], device: &Device) -> Result<Tensor> {
    let cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != cols) {
        candle_core::bail!("ragged rows cannot form a tensor");
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::from_vec(flat, (rows.len(), cols), device)
}

/// `(batch, formants, tokens)` nested rows to a tensor.
pub fn cube_to_tensor(cube: &[Vec<Vec<f32>>], device: &Device) -> Result<Tensor> {
    let planes = cube
        .iter()
        .map(|plane| rows_to_tensor(plane, device))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&planes, 0)
}

/// Snapshot tensors into a hook bundle.
pub fn bundle_from_tensors(
    durations: &Tensor,
    pitch: &Tensor,
    energy: Option<&Tensor>,
    tokens: &[Vec<u32>],
    text: Option<&str>,
    is_fresh_synth: bool,
) -> Result<ProsodyBundle> {
    Ok(ProsodyBundle {
        durations: durations.to_vec2::<f32>()?,
        pitch: pitch.to_vec3::<f32>()?,
        energy: energy.map(|e| e.to_vec2::<f32>()).transpose()?,
        tokens: tokens.to_vec(),
        text: text.map(str::to_owned),
        is_fresh_synth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curves(len: usize) -> ProsodyCurves {
        ProsodyCurves::single_formant(vec![2.0; len], vec![0.0; len], vec![1.0; len])
    }

    #[test]
    fn test_no_side_data_is_self_predicted() {
        let source = ProsodySource::resolve(None, None, &[vec![1, 2]], 1, true);
        assert_eq!(source, ProsodySource::SelfPredicted);
    }

    #[test]
    fn test_valid_side_data_is_supplied() {
        let source = ProsodySource::resolve(Some(&curves(3)), None, &[vec![1, 2, 3]], 1, true);
        match source {
            ProsodySource::Supplied(validated) => assert!(validated.splice.is_none()),
            other => panic!("expected supplied prosody, got {other:?}"),
        }
    }

    #[test]
    fn test_side_data_validated_against_old_sequence() {
        let old = [1u32, 2, 3, 4];
        let source =
            ProsodySource::resolve(Some(&curves(4)), Some(&old), &[vec![1, 9, 3, 4, 5]], 1, true);
        let ProsodySource::Supplied(validated) = source else {
            panic!("expected supplied prosody");
        };
        let splice = validated.splice.unwrap();
        assert_eq!(splice.old_len(), 4);
        assert_eq!(splice.new_len(), 5);

        // Curves sized for the new sequence do not match the old one.
        let source =
            ProsodySource::resolve(Some(&curves(5)), Some(&old), &[vec![1, 9, 3, 4, 5]], 1, true);
        assert!(!source.is_supplied());
    }

    #[test]
    fn test_malformed_side_data_falls_back() {
        let mut bad = curves(3);
        bad.pitch[0][1] = f32::NAN;
        let source = ProsodySource::resolve(Some(&bad), None, &[vec![1, 2, 3]], 1, true);
        assert!(!source.is_supplied());

        let source = ProsodySource::resolve(Some(&curves(3)), None, &[vec![1, 2, 3]], 2, true);
        assert!(!source.is_supplied());
    }

    #[test]
    fn test_batched_side_data_rejected() {
        let source =
            ProsodySource::resolve(Some(&curves(2)), None, &[vec![1, 2], vec![3, 4]], 1, true);
        assert!(!source.is_supplied());
    }

    #[test]
    fn test_tensor_helpers() {
        let device = Device::Cpu;
        let rows = vec![vec![1f32, 2.0], vec![3.0, 4.0]];
        let t = rows_to_tensor(&rows, &device).unwrap();
        assert_eq!(t.to_vec2::<f32>().unwrap(), rows);
        assert!(rows_to_tensor(&[vec![1.0], vec![]], &device).is_err());

        let cube = vec![vec![vec![1f32, 2.0]], vec![vec![3.0, 4.0]]];
        let t = cube_to_tensor(&cube, &device).unwrap();
        assert_eq!(t.dims(), &[2, 1, 2]);

        let bundle = bundle_from_tensors(
            &rows_to_tensor(&rows, &device).unwrap(),
            &t,
            None,
            &[vec![1, 2], vec![3, 4]],
            Some("hi"),
            true,
        )
        .unwrap();
        assert_eq!(bundle.pitch, cube);
        assert!(bundle.energy.is_none());
    }
}
