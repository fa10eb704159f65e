//! Per-token averaging of frame-rate signals.

use candle_core::{DType, Result, Tensor, bail};

/// Average a frame-rate signal over each token's frame interval.
///
/// `signal` is `(batch, channels, frames)`, `durations` is `(batch, tokens)`
/// with integral values whose per-sample sum does not exceed `frames`.
/// Zero-valued frames count as unvoiced and are excluded from both the sum
/// and the count; an interval without voiced frames averages to 0.
///
/// Returns `(batch, channels, tokens)`.
pub fn average_over_durations(signal: &Tensor, durations: &Tensor) -> Result<Tensor> {
    let (batch, channels, frames) = signal.dims3()?;
    let (dur_batch, tokens) = durations.dims2()?;
    if dur_batch != batch {
        bail!("signal batch {batch} does not match durations batch {dur_batch}");
    }
    let signal = signal.to_dtype(DType::F32)?;
    if tokens == 0 {
        return Tensor::zeros((batch, channels, 0), DType::F32, signal.device());
    }

    let ends = durations.to_dtype(DType::F32)?.round()?.cumsum(1)?;
    let max_end = ends.max_keepdim(1)?.max(0)?.to_vec1::<f32>()?[0];
    if max_end > frames as f32 {
        bail!("durations cover {max_end} frames but the signal has {frames}");
    }
    let starts = ends.narrow(1, 0, tokens - 1)?.pad_with_zeros(1, 1, 0)?;
    let ends = boundary_index(&ends, channels)?;
    let starts = boundary_index(&starts, channels)?;

    // Prefix sums with a leading zero so that interval [s, e) is cums[e] - cums[s].
    let voiced = signal.ne(0f32)?.to_dtype(DType::F32)?;
    let voiced_cums = voiced.cumsum(2)?.pad_with_zeros(2, 1, 0)?;
    let signal_cums = signal.cumsum(2)?.pad_with_zeros(2, 1, 0)?;

    let sums = (signal_cums.gather(&ends, 2)? - signal_cums.gather(&starts, 2)?)?;
    let counts = (voiced_cums.gather(&ends, 2)? - voiced_cums.gather(&starts, 2)?)?;

    let silent = counts.eq(0f32)?;
    let averages = (sums / counts.maximum(1f32)?)?;
    silent.where_cond(&averages.zeros_like()?, &averages)
}

/// Turn `(batch, tokens)` frame offsets into a gather index for
/// `(batch, channels, frames + 1)` prefix sums.
fn boundary_index(offsets: &Tensor, channels: usize) -> Result<Tensor> {
    let (batch, tokens) = offsets.dims2()?;
    offsets
        .to_dtype(DType::U32)?
        .unsqueeze(1)?
        .expand((batch, channels, tokens))?
        .contiguous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "got {actual:?}, expected {expected:?}");
        }
    }

    #[test]
    fn test_unvoiced_frames_excluded() {
        let device = Device::Cpu;
        let signal = Tensor::new(&[[[1f32, 1.0, 1.0, 0.0, 5.0]]], &device).unwrap();
        let durations = Tensor::new(&[[3f32, 0.0, 2.0]], &device).unwrap();

        let avg = average_over_durations(&signal, &durations).unwrap();
        assert_eq!(avg.dims(), &[1, 1, 3]);
        let values = avg.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_close(&values, &[1.0, 0.0, 5.0]);
    }

    #[test]
    fn test_all_zero_interval_is_zero_not_nan() {
        let device = Device::Cpu;
        let signal = Tensor::new(&[[[0f32, 0.0, 2.0, 4.0]]], &device).unwrap();
        let durations = Tensor::new(&[[2f32, 2.0]], &device).unwrap();

        let values = average_over_durations(&signal, &durations)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert_close(&values, &[0.0, 3.0]);
    }

    #[test]
    fn test_multiple_channels_and_batch() {
        let device = Device::Cpu;
        // Two samples, two formant channels, four frames.
        let signal = Tensor::new(
            &[
                [[1f32, 3.0, 2.0, 2.0], [10.0, 0.0, 0.0, 6.0]],
                [[4f32, 4.0, 8.0, 0.0], [1.0, 1.0, 1.0, 1.0]],
            ],
            &device,
        )
        .unwrap();
        // Second sample only covers three of the four frames.
        let durations = Tensor::new(&[[2f32, 2.0], [1.0, 2.0]], &device).unwrap();

        let avg = average_over_durations(&signal, &durations)
            .unwrap()
            .to_vec3::<f32>()
            .unwrap();
        assert_close(&avg[0][0], &[2.0, 2.0]);
        assert_close(&avg[0][1], &[10.0, 6.0]);
        assert_close(&avg[1][0], &[4.0, 6.0]);
        assert_close(&avg[1][1], &[1.0, 1.0]);
    }

    #[test]
    fn test_negative_values_are_voiced() {
        let device = Device::Cpu;
        let signal = Tensor::new(&[[[-1f32, -3.0]]], &device).unwrap();
        let durations = Tensor::new(&[[2f32]], &device).unwrap();
        let values = average_over_durations(&signal, &durations)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_close(&values, &[-2.0]);
    }

    #[test]
    fn test_durations_longer_than_signal_rejected() {
        let device = Device::Cpu;
        let signal = Tensor::new(&[[[1f32, 2.0]]], &device).unwrap();
        let durations = Tensor::new(&[[2f32, 1.0]], &device).unwrap();
        assert!(average_over_durations(&signal, &durations).is_err());
    }
}
