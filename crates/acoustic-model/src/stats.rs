//! Pitch normalisation statistics.

use serde::{Deserialize, Serialize};
use tts_core::{TtsError, TtsResult};

/// Mean and standard deviation of voiced pitch over a training corpus.
///
/// Pitch is modelled in normalised units; these two scalars convert it back
/// to Hz. Zero-valued frames are unvoiced and stay zero in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchStats {
    pub mean: f32,
    pub std: f32,
}

impl PitchStats {
    /// Build stats, rejecting a non-positive or non-finite deviation.
    pub fn new(mean: f32, std: f32) -> TtsResult<Self> {
        if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
            return Err(TtsError::invalid_input(format!(
                "invalid pitch statistics: mean {mean}, std {std}"
            )));
        }
        Ok(Self { mean, std })
    }

    /// Population mean and standard deviation over all voiced (non-zero) frames.
    pub fn from_voiced_frames<'a>(curves: impl IntoIterator<Item = &'a [f32]>) -> TtsResult<Self> {
        let (mut count, mut sum, mut sum_sq) = (0usize, 0f64, 0f64);
        for &value in curves.into_iter().flatten() {
            if value != 0.0 {
                count += 1;
                sum += value as f64;
                sum_sq += (value as f64) * (value as f64);
            }
        }
        if count == 0 {
            return Err(TtsError::invalid_input("no voiced frames to compute pitch statistics"));
        }
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        Self::new(mean as f32, variance.sqrt() as f32)
    }

    /// Hz to normalised units.
    pub fn normalize(&self, pitch: &[f32]) -> Vec<f32> {
        pitch
            .iter()
            .map(|&p| if p == 0.0 { 0.0 } else { (p - self.mean) / self.std })
            .collect()
    }

    /// Normalised units to Hz.
    pub fn denormalize(&self, pitch: &[f32]) -> Vec<f32> {
        pitch
            .iter()
            .map(|&p| if p == 0.0 { 0.0 } else { p * self.std + self.mean })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_voiced_frames_ignores_zeros() {
        let a = [100f32, 0.0, 200.0];
        let b = [0f32, 300.0];
        let stats = PitchStats::from_voiced_frames([&a[..], &b[..]]).unwrap();
        assert!((stats.mean - 200.0).abs() < 1e-3);
        assert!((stats.std - 81.6497).abs() < 1e-2);
    }

    #[test]
    fn test_round_trip_keeps_unvoiced() {
        let stats = PitchStats::new(150.0, 50.0).unwrap();
        let normalized = stats.normalize(&[200.0, 0.0, 100.0]);
        assert_eq!(normalized, vec![1.0, 0.0, -1.0]);
        assert_eq!(stats.denormalize(&normalized), vec![200.0, 0.0, 100.0]);
    }

    #[test]
    fn test_rejects_degenerate() {
        assert!(PitchStats::new(100.0, 0.0).is_err());
        assert!(PitchStats::from_voiced_frames([&[0f32, 0.0][..]]).is_err());
    }
}
