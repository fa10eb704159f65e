//! Align command: hard durations from a soft attention matrix.

use std::path::Path;

use acoustic_model::{AlignmentSearch, LogProbGrid, MonotonicSearch};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct AlignReport {
    frames: usize,
    tokens: usize,
    durations: Vec<u32>,
    path: Vec<usize>,
}

/// Run the align command.
pub fn run(attention: &Path, width: usize) -> Result<()> {
    if width == 0 {
        bail!("width must be at least 1");
    }
    let content = std::fs::read_to_string(attention)
        .with_context(|| format!("failed to read {}", attention.display()))?;
    let rows: Vec<Vec<f32>> =
        serde_json::from_str(&content).context("attention must be a JSON array of rows")?;
    let grid = to_log_grid(&rows)?;

    let alignment = MonotonicSearch::new(width).search(&grid);
    info!(
        frames = grid.frames(),
        tokens = grid.tokens(),
        width,
        "alignment extracted"
    );

    let report = AlignReport {
        frames: alignment.frames(),
        tokens: alignment.tokens(),
        durations: alignment.durations(),
        path: alignment.path().to_vec(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn to_log_grid(rows: &[Vec<f32>]) -> Result<LogProbGrid> {
    let frames = rows.len();
    let tokens = rows.first().map_or(0, Vec::len);
    if frames == 0 || tokens == 0 {
        bail!("attention matrix is empty");
    }
    let mut values = Vec::with_capacity(frames * tokens);
    for (t, row) in rows.iter().enumerate() {
        if row.len() != tokens {
            bail!("row {t} has {} entries, expected {tokens}", row.len());
        }
        values.extend(row.iter().map(|p| p.max(1e-8).ln()));
    }
    Ok(LogProbGrid::new(frames, tokens, values)?)
}
