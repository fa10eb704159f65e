//! Partial re-synthesis: which token positions keep previous prosody.
//!
//! When a line is edited and re-synthesised, tokens before and after the edit
//! keep the durations, pitch and energy they had in the previous synthesis;
//! only the edited region is predicted afresh.

use tts_core::{TtsError, TtsResult};

/// Retained ranges of an edited token sequence.
///
/// Positions `0..=start` are copied from the old prosody by index. Positions
/// `end..new_len` are copied from the old prosody counting from the end, so
/// a suffix shifted by an insertion or deletion still lines up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceBounds {
    start: Option<usize>,
    end: Option<usize>,
    old_len: usize,
    new_len: usize,
}

impl SpliceBounds {
    /// Compare `old` and `new` token sequences.
    pub fn detect(old: &[u32], new: &[u32]) -> Self {
        let (old_len, new_len) = (old.len(), new.len());
        let none = Self {
            start: None,
            end: None,
            old_len,
            new_len,
        };
        if old.is_empty() || new.is_empty() {
            return none;
        }
        let common = old_len.min(new_len);

        let start = (old[0] == new[0]).then(|| {
            let divergence = (0..common).find(|&i| old[i] != new[i]).unwrap_or(common);
            divergence - 1
        });

        let end = if old == new || old[old_len - 1] != new[new_len - 1] {
            None
        } else {
            let divergence = (0..common)
                .find(|&i| old[old_len - 1 - i] != new[new_len - 1 - i])
                .unwrap_or(common);
            let end = new_len + 1 - divergence;
            // The back range never reaches into the front range.
            let end = start.map_or(end, |start| end.max(start + 1));
            (end < new_len).then_some(end)
        };

        Self {
            start,
            end,
            old_len,
            new_len,
        }
    }

    /// Last index of the retained prefix.
    pub fn start(&self) -> Option<usize> {
        self.start
    }

    /// First index (in the new sequence) of the retained suffix.
    pub fn end(&self) -> Option<usize> {
        self.end
    }

    /// Whether any position is retained.
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Length of the sequence the old prosody belongs to.
    pub fn old_len(&self) -> usize {
        self.old_len
    }

    /// Length of the sequence being synthesised.
    pub fn new_len(&self) -> usize {
        self.new_len
    }

    /// Overwrite the retained positions of `fresh` with `existing` values.
    pub fn apply(&self, fresh: &mut [f32], existing: &[f32]) -> TtsResult<()> {
        if fresh.len() != self.new_len || existing.len() != self.old_len {
            return Err(TtsError::invalid_input(format!(
                "splice expects {} fresh and {} existing values, got {} and {}",
                self.new_len,
                self.old_len,
                fresh.len(),
                existing.len()
            )));
        }
        if let Some(start) = self.start {
            fresh[..=start].copy_from_slice(&existing[..=start]);
        }
        if let Some(end) = self.end {
            let kept = self.new_len - end;
            fresh[end..].copy_from_slice(&existing[self.old_len - kept..]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_substitution() {
        // a b c d -> a x c d
        let bounds = SpliceBounds::detect(&[1, 2, 3, 4], &[1, 9, 3, 4]);
        assert_eq!(bounds.start(), Some(0));
        assert_eq!(bounds.end(), Some(3));

        let mut fresh = vec![10.0, 11.0, 12.0, 13.0];
        bounds.apply(&mut fresh, &[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(fresh, vec![0.0, 11.0, 12.0, 3.0]);
    }

    #[test]
    fn test_identical_sequences_keep_everything_by_prefix() {
        let bounds = SpliceBounds::detect(&[1, 2, 3], &[1, 2, 3]);
        assert_eq!(bounds.start(), Some(2));
        assert_eq!(bounds.end(), None);

        let mut fresh = vec![0.0; 3];
        bounds.apply(&mut fresh, &[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(fresh, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_changed_first_token() {
        let bounds = SpliceBounds::detect(&[1, 2, 3, 4], &[7, 2, 3, 4]);
        assert_eq!(bounds.start(), None);
        assert_eq!(bounds.end(), Some(2));
    }

    #[test]
    fn test_changed_last_token() {
        let bounds = SpliceBounds::detect(&[1, 2, 3, 4], &[1, 2, 3, 8]);
        assert_eq!(bounds.start(), Some(2));
        assert_eq!(bounds.end(), None);
    }

    #[test]
    fn test_nothing_in_common() {
        let bounds = SpliceBounds::detect(&[1, 2], &[3, 4]);
        assert!(bounds.is_empty());
    }

    #[test]
    fn test_insertion_aligns_suffix_from_end() {
        // a b c d -> a b x y c d
        let bounds = SpliceBounds::detect(&[1, 2, 3, 4], &[1, 2, 8, 9, 3, 4]);
        assert_eq!(bounds.start(), Some(1));
        assert_eq!(bounds.end(), Some(5));

        let mut fresh = vec![0.0; 6];
        bounds.apply(&mut fresh, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(fresh, vec![1.0, 2.0, 0.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_deletion() {
        // a b c d e -> a e
        let bounds = SpliceBounds::detect(&[1, 2, 3, 4, 5], &[1, 5]);
        assert_eq!(bounds.start(), Some(0));
        assert_eq!(bounds.end(), None);
    }

    #[test]
    fn test_prefix_extension() {
        // a b -> a b c: the whole old sequence is a prefix of the new one.
        let bounds = SpliceBounds::detect(&[1, 2], &[1, 2, 3]);
        assert_eq!(bounds.start(), Some(1));
        assert_eq!(bounds.end(), None);

        let mut fresh = vec![9.0; 3];
        bounds.apply(&mut fresh, &[1.0, 2.0]).unwrap();
        assert_eq!(fresh, vec![1.0, 2.0, 9.0]);
    }

    #[test]
    fn test_apply_checks_lengths() {
        let bounds = SpliceBounds::detect(&[1, 2, 3], &[1, 2, 4]);
        let mut fresh = vec![0.0; 3];
        assert!(bounds.apply(&mut fresh, &[1.0, 2.0]).is_err());
        let mut short = vec![0.0; 2];
        assert!(bounds.apply(&mut short, &[1.0, 2.0, 3.0]).is_err());
    }
}
