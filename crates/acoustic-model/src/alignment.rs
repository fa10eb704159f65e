//! Monotonic alignment search (MAS).
//!
//! Soft text/audio attention is binarised into a hard alignment in which every
//! mel frame belongs to exactly one token and the token index never decreases
//! as the frame index grows. The search itself is a per-sample dynamic
//! program behind [`AlignmentSearch`]; [`binarize_attention`] handles batch
//! unpacking, parallel dispatch across samples and packing of the results.

use candle_core::{DType, Result, Tensor, bail};
use tracing::{debug, instrument};

/// Row-major `frames x tokens` matrix of log-probabilities for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LogProbGrid {
    frames: usize,
    tokens: usize,
    values: Vec<f32>,
}

impl LogProbGrid {
    /// Wrap row-major values; `values.len()` must equal `frames * tokens`.
    pub fn new(frames: usize, tokens: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != frames * tokens {
            bail!(
                "grid of {frames}x{tokens} needs {} values, got {}",
                frames * tokens,
                values.len()
            );
        }
        Ok(Self {
            frames,
            tokens,
            values,
        })
    }

    /// Number of mel frames (rows).
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of tokens (columns).
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Log-probability of `frame` aligning to `token`.
    pub fn get(&self, frame: usize, token: usize) -> f32 {
        self.values[frame * self.tokens + token]
    }
}

/// Hard alignment of one sample: the token each frame is assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardAlignment {
    tokens: usize,
    path: Vec<usize>,
}

impl HardAlignment {
    /// Token index per frame.
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.path.len()
    }

    /// Number of tokens the alignment spans.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Frames assigned to each token.
    pub fn durations(&self) -> Vec<u32> {
        let mut durations = vec![0u32; self.tokens];
        for &token in &self.path {
            durations[token] += 1;
        }
        durations
    }

    /// Whether token indices never decrease along the path.
    pub fn is_monotonic(&self) -> bool {
        self.path.windows(2).all(|pair| pair[0] <= pair[1])
    }
}

/// Per-sample alignment algorithm.
pub trait AlignmentSearch: std::fmt::Debug + Send + Sync {
    /// Find the hard alignment of one sample.
    fn search(&self, grid: &LogProbGrid) -> HardAlignment;
}

/// Viterbi search over a diagonal band.
///
/// Frame `i` may stay on the token of frame `i - 1` or advance by up to
/// `width` tokens. The path starts at token 0 and, whenever there are at least
/// as many frames as tokens, ends at the last token with every token visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonotonicSearch {
    width: usize,
}

impl Default for MonotonicSearch {
    fn default() -> Self {
        Self { width: 1 }
    }
}

impl MonotonicSearch {
    /// Create a search with the given band width (at least 1).
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    /// Band width.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl AlignmentSearch for MonotonicSearch {
    fn search(&self, grid: &LogProbGrid) -> HardAlignment {
        let (frames, tokens) = (grid.frames(), grid.tokens());
        if frames == 0 || tokens == 0 {
            return HardAlignment {
                tokens,
                path: Vec::new(),
            };
        }
        if tokens == 1 || frames == 1 {
            return HardAlignment {
                tokens,
                path: vec![0; frames],
            };
        }

        let width = self.width;
        // With fewer frames than the band can cover, the last token is
        // unreachable; drop the end constraint and keep the best final cell.
        let reaches_end = (frames - 1) * width >= tokens - 1;
        let allowed = |frame: usize, token: usize| {
            token <= frame * width
                && (!reaches_end || tokens - 1 - token <= (frames - 1 - frame) * width)
        };

        let mut log_p = vec![f32::NEG_INFINITY; frames * tokens];
        let mut prev = vec![0usize; frames * tokens];
        log_p[0] = grid.get(0, 0);

        for frame in 1..frames {
            let row = frame * tokens;
            let prev_row = row - tokens;
            for token in 0..tokens {
                if !allowed(frame, token) {
                    continue;
                }
                let lowest = token.saturating_sub(width);
                let mut best: Option<(usize, f32)> = None;
                for candidate in lowest..=token {
                    if !allowed(frame - 1, candidate) {
                        continue;
                    }
                    let score = log_p[prev_row + candidate];
                    // Strict comparison keeps the earliest (most advancing) candidate on ties.
                    match best {
                        Some((_, best_score)) if score <= best_score => {}
                        _ => best = Some((candidate, score)),
                    }
                }
                let (from, score) = best.unwrap_or((token, f32::NEG_INFINITY));
                log_p[row + token] = grid.get(frame, token) + score;
                prev[row + token] = from;
            }
        }

        let last_row = (frames - 1) * tokens;
        let mut token = if reaches_end {
            tokens - 1
        } else {
            (0..tokens)
                .filter(|&t| allowed(frames - 1, t))
                .fold(None, |best: Option<usize>, t| match best {
                    Some(b) if log_p[last_row + b] >= log_p[last_row + t] => Some(b),
                    _ => Some(t),
                })
                .unwrap_or(0)
        };

        let mut path = vec![0usize; frames];
        for frame in (0..frames).rev() {
            path[frame] = token;
            if frame > 0 {
                token = prev[frame * tokens + token];
            }
        }
        HardAlignment { tokens, path }
    }
}

/// Run `search` over every grid, spreading samples across worker threads.
///
/// Each sample is searched sequentially on one thread; results come back in
/// input order.
pub fn search_batch(search: &dyn AlignmentSearch, grids: &[LogProbGrid]) -> Vec<HardAlignment> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(grids.len());
    if workers <= 1 {
        return grids.iter().map(|grid| search.search(grid)).collect();
    }

    let chunk = grids.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = grids
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || part.iter().map(|grid| search.search(grid)).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

/// Binarise soft attention `(batch, 1, frames, tokens)` with `search`.
///
/// Only the top-left `out_lens[b] x in_lens[b]` region of each sample is
/// searched; everything outside it is zero in the result. The result carries
/// no gradient.
#[instrument(skip_all, fields(batch = in_lens.len()))]
pub fn binarize_attention(
    search: &dyn AlignmentSearch,
    soft_attn: &Tensor,
    in_lens: &[u32],
    out_lens: &[u32],
) -> Result<Tensor> {
    let (batch, _, frames, tokens) = soft_attn.dims4()?;
    if in_lens.len() != batch || out_lens.len() != batch {
        bail!(
            "expected {batch} input/output lengths, got {}/{}",
            in_lens.len(),
            out_lens.len()
        );
    }

    let log_attn = soft_attn
        .detach()
        .to_dtype(DType::F32)?
        .log()?
        .flatten_all()?
        .to_vec1::<f32>()?;

    let mut grids = Vec::with_capacity(batch);
    for (b, (&in_len, &out_len)) in in_lens.iter().zip(out_lens).enumerate() {
        let (in_len, out_len) = (in_len as usize, out_len as usize);
        if in_len > tokens || out_len > frames {
            bail!("sample {b}: lengths {out_len}x{in_len} exceed attention {frames}x{tokens}");
        }
        let base = b * frames * tokens;
        let mut values = Vec::with_capacity(out_len * in_len);
        for frame in 0..out_len {
            let start = base + frame * tokens;
            values.extend_from_slice(&log_attn[start..start + in_len]);
        }
        grids.push(LogProbGrid::new(out_len, in_len, values)?);
    }

    let alignments = search_batch(search, &grids);

    let mut hard = vec![0f32; batch * frames * tokens];
    for (b, alignment) in alignments.iter().enumerate() {
        let base = b * frames * tokens;
        for (frame, &token) in alignment.path().iter().enumerate() {
            hard[base + frame * tokens + token] = 1.0;
        }
    }
    debug!(frames, tokens, "binarised attention");

    Tensor::from_vec(hard, (batch, 1, frames, tokens), soft_attn.device())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn grid_from_rows(rows: &[&[f32]]) -> LogProbGrid {
        let tokens = rows[0].len();
        let values = rows.iter().flat_map(|r| r.iter().map(|p| p.ln())).collect();
        LogProbGrid::new(rows.len(), tokens, values).unwrap()
    }

    fn random_grid(rng: &mut StdRng, frames: usize, tokens: usize) -> LogProbGrid {
        let values = (0..frames * tokens)
            .map(|_| rng.gen_range(1e-4f32..1.0).ln())
            .collect();
        LogProbGrid::new(frames, tokens, values).unwrap()
    }

    #[test]
    fn test_follows_clear_diagonal() {
        let grid = grid_from_rows(&[
            &[0.9, 0.05, 0.05],
            &[0.8, 0.1, 0.1],
            &[0.1, 0.8, 0.1],
            &[0.1, 0.1, 0.8],
            &[0.1, 0.1, 0.8],
        ]);
        let alignment = MonotonicSearch::default().search(&grid);
        assert_eq!(alignment.path(), &[0, 0, 1, 2, 2]);
        assert_eq!(alignment.durations(), vec![2, 1, 2]);
    }

    #[test]
    fn test_every_token_visited_despite_skewed_scores() {
        // Token 1 is never preferred, but skipping it is not allowed.
        let grid = grid_from_rows(&[
            &[0.9, 0.0001, 0.1],
            &[0.9, 0.0001, 0.1],
            &[0.1, 0.0001, 0.9],
            &[0.1, 0.0001, 0.9],
        ]);
        let alignment = MonotonicSearch::default().search(&grid);
        assert!(alignment.is_monotonic());
        assert!(alignment.durations().iter().all(|&d| d >= 1));
        assert_eq!(alignment.path()[0], 0);
        assert_eq!(*alignment.path().last().unwrap(), 2);
    }

    #[test]
    fn test_square_grid_is_diagonal() {
        let mut rng = StdRng::seed_from_u64(3);
        let grid = random_grid(&mut rng, 6, 6);
        let alignment = MonotonicSearch::default().search(&grid);
        assert_eq!(alignment.path(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_degenerate_shapes() {
        let search = MonotonicSearch::default();

        let single_token = LogProbGrid::new(4, 1, vec![-1.0; 4]).unwrap();
        assert_eq!(search.search(&single_token).path(), &[0, 0, 0, 0]);

        let single_frame = LogProbGrid::new(1, 3, vec![-5.0, -0.1, -0.2]).unwrap();
        assert_eq!(search.search(&single_frame).path(), &[0]);

        let empty = LogProbGrid::new(0, 3, vec![]).unwrap();
        assert!(search.search(&empty).path().is_empty());
    }

    #[test]
    fn test_fewer_frames_than_tokens_still_one_per_row() {
        let mut rng = StdRng::seed_from_u64(11);
        let grid = random_grid(&mut rng, 3, 7);
        let alignment = MonotonicSearch::default().search(&grid);
        assert_eq!(alignment.frames(), 3);
        assert!(alignment.is_monotonic());
        assert_eq!(alignment.path()[0], 0);
        assert_eq!(alignment.durations().iter().sum::<u32>(), 3);
    }

    #[test]
    fn test_random_grids_are_valid_paths() {
        let mut rng = StdRng::seed_from_u64(42);
        let search = MonotonicSearch::default();
        for _ in 0..50 {
            let tokens = rng.gen_range(1..12);
            let frames = rng.gen_range(tokens..tokens * 4 + 1);
            let grid = random_grid(&mut rng, frames, tokens);
            let alignment = search.search(&grid);

            assert_eq!(alignment.frames(), frames);
            assert!(alignment.is_monotonic());
            assert_eq!(alignment.path()[0], 0);
            assert_eq!(*alignment.path().last().unwrap(), tokens - 1);
            assert!(alignment.path().windows(2).all(|p| p[1] - p[0] <= 1));
            let durations = alignment.durations();
            assert!(durations.iter().all(|&d| d >= 1));
            assert_eq!(durations.iter().sum::<u32>() as usize, frames);
        }
    }

    #[test]
    fn test_wider_band_allows_skips() {
        // Token 1 is effectively impossible; width 2 may jump over it.
        let grid = grid_from_rows(&[
            &[0.9, 1e-30, 0.1],
            &[0.1, 1e-30, 0.9],
            &[0.1, 1e-30, 0.9],
        ]);
        let narrow = MonotonicSearch::new(1).search(&grid);
        let wide = MonotonicSearch::new(2).search(&grid);
        assert_eq!(narrow.path(), &[0, 1, 2]);
        assert_eq!(wide.path(), &[0, 2, 2]);
        assert_eq!(MonotonicSearch::new(0).width(), 1);
    }

    #[test]
    fn test_search_batch_preserves_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let grids: Vec<_> = (0..9)
            .map(|i| random_grid(&mut rng, 10 + i, 3 + i % 4))
            .collect();
        let search = MonotonicSearch::default();

        let parallel = search_batch(&search, &grids);
        let sequential: Vec<_> = grids.iter().map(|g| search.search(g)).collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_binarize_attention_pads_outside_lengths() {
        let device = Device::Cpu;
        // Two samples, 4 frames x 3 tokens; second sample uses 3 frames x 2 tokens.
        let soft = Tensor::new(
            &[
                [[
                    [0.8f32, 0.1, 0.1],
                    [0.1, 0.8, 0.1],
                    [0.1, 0.1, 0.8],
                    [0.1, 0.1, 0.8],
                ]],
                [[
                    [0.7f32, 0.3, 0.0],
                    [0.6, 0.4, 0.0],
                    [0.2, 0.8, 0.0],
                    [0.3, 0.3, 0.4],
                ]],
            ],
            &device,
        )
        .unwrap();

        let hard = binarize_attention(&MonotonicSearch::default(), &soft, &[3, 2], &[4, 3])
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap();
        assert_eq!(hard.dims(), &[2, 1, 4, 3]);

        let values = hard.squeeze(1).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(values[0], vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 0.0, 1.0],
        ]);
        assert_eq!(values[1], vec![
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0],
        ]);

        let durations = hard.sum(2).unwrap().squeeze(1).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(durations, vec![vec![1.0, 1.0, 2.0], vec![2.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_binarize_attention_rejects_bad_lengths() {
        let device = Device::Cpu;
        let soft = Tensor::ones((1, 1, 2, 2), DType::F32, &device).unwrap();
        let search = MonotonicSearch::default();
        assert!(binarize_attention(&search, &soft, &[3], &[2]).is_err());
        assert!(binarize_attention(&search, &soft, &[2, 2], &[2]).is_err());
    }
}
