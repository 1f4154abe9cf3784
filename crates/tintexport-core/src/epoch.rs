//! Epoch model
//!
//! An epoch is a contiguous sample range of one tetrode's recording, labelled
//! with where its samples come from. Unit-mode recordings only keep samples
//! around threshold crossings, so the ranges in between are gaps that must be
//! synthesized before the signal can be treated as continuous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TintError};

/// Origin of the samples inside an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpochKind {
    /// Raw continuous recording
    Continuous,
    /// Real samples kept around a threshold crossing
    Crossing,
    /// Unrecorded range, not yet filled
    Gap,
    /// Unrecorded range filled with synthetic noise
    Synthesized,
}

impl EpochKind {
    /// True for epochs backed by acquired samples
    pub fn is_real(self) -> bool {
        matches!(self, EpochKind::Continuous | EpochKind::Crossing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EpochKind::Continuous => "continuous",
            EpochKind::Crossing => "crossing",
            EpochKind::Gap => "gap",
            EpochKind::Synthesized => "synthesized",
        }
    }
}

impl fmt::Display for EpochKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpochKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(EpochKind::Continuous),
            "crossing" => Ok(EpochKind::Crossing),
            "gap" => Ok(EpochKind::Gap),
            "synthesized" => Ok(EpochKind::Synthesized),
            other => Err(format!("unknown epoch kind '{other}'")),
        }
    }
}

/// A labelled sample range `[start_sample, start_sample + length_samples)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub start_sample: u64,
    pub length_samples: u64,
    pub kind: EpochKind,
}

impl Epoch {
    pub fn new(start_sample: u64, length_samples: u64, kind: EpochKind) -> Self {
        Self {
            start_sample,
            length_samples,
            kind,
        }
    }

    /// First sample after the epoch
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.length_samples
    }

    pub fn contains(&self, sample: u64) -> bool {
        sample >= self.start_sample && sample < self.end_sample()
    }

    /// True if the epoch shares at least one sample with `other`
    pub fn overlaps(&self, other: &Epoch) -> bool {
        self.start_sample < other.end_sample() && other.start_sample < self.end_sample()
    }
}

/// Split `[0, total_samples)` into crossing epochs and the gaps between them
///
/// `crossing_windows` are `(start_sample, length_samples)` pairs and may be
/// given in any order. They must not overlap and must lie inside the
/// recording.
///
/// # Example
/// ```
/// use tintexport_core::epoch::{build_epochs, EpochKind};
///
/// let epochs = build_epochs(1000, &[(100, 50)]).unwrap();
/// assert_eq!(epochs.len(), 3);
/// assert_eq!(epochs[1].kind, EpochKind::Crossing);
/// ```
pub fn build_epochs(total_samples: u64, crossing_windows: &[(u64, u64)]) -> Result<Vec<Epoch>> {
    if total_samples == 0 {
        return Err(TintError::InvalidEpoch(
            "recording has no samples".to_string(),
        ));
    }

    let mut windows = crossing_windows.to_vec();
    windows.sort_unstable();

    let mut epochs = Vec::with_capacity(windows.len() * 2 + 1);
    let mut cursor = 0u64;

    for &(start, length) in &windows {
        if length == 0 {
            return Err(TintError::InvalidEpoch(format!(
                "crossing window at sample {start} has zero length"
            )));
        }
        let end = start.checked_add(length).ok_or_else(|| {
            TintError::InvalidEpoch(format!("crossing window at sample {start} overflows"))
        })?;
        if end > total_samples {
            return Err(TintError::InvalidEpoch(format!(
                "crossing window [{start}, {end}) exceeds {total_samples} samples"
            )));
        }
        if start < cursor {
            return Err(TintError::InvalidEpoch(format!(
                "crossing window [{start}, {end}) overlaps the previous window ending at {cursor}"
            )));
        }
        if start > cursor {
            epochs.push(Epoch::new(cursor, start - cursor, EpochKind::Gap));
        }
        epochs.push(Epoch::new(start, length, EpochKind::Crossing));
        cursor = end;
    }

    if cursor < total_samples {
        epochs.push(Epoch::new(cursor, total_samples - cursor, EpochKind::Gap));
    }

    tracing::debug!(
        total_samples,
        windows = windows.len(),
        epochs = epochs.len(),
        "epochs_built"
    );

    Ok(epochs)
}

/// The single epoch describing a raw continuous recording
pub fn continuous_epochs(total_samples: u64) -> Result<Vec<Epoch>> {
    if total_samples == 0 {
        return Err(TintError::InvalidEpoch(
            "recording has no samples".to_string(),
        ));
    }
    Ok(vec![Epoch::new(0, total_samples, EpochKind::Continuous)])
}

/// Check that `epochs` tile `[0, total_samples)` exactly, in order
pub fn validate_epochs(total_samples: u64, epochs: &[Epoch]) -> Result<()> {
    let mut cursor = 0u64;
    for epoch in epochs {
        if epoch.length_samples == 0 {
            return Err(TintError::InvalidEpoch(format!(
                "epoch at sample {} has zero length",
                epoch.start_sample
            )));
        }
        if epoch.start_sample != cursor {
            return Err(TintError::InvalidEpoch(format!(
                "epoch starts at sample {} but the previous one ended at {cursor}",
                epoch.start_sample
            )));
        }
        cursor = epoch.end_sample();
    }
    if cursor != total_samples {
        return Err(TintError::InvalidEpoch(format!(
            "epochs cover {cursor} samples, recording has {total_samples}"
        )));
    }
    Ok(())
}

/// Sum of all epoch lengths
pub fn total_length(epochs: &[Epoch]) -> u64 {
    epochs.iter().map(|e| e.length_samples).sum()
}

/// Merge overlapping `(start, length)` windows and clip them to the recording
///
/// Spike snippets of neighbouring spikes often overlap; the merged windows are
/// valid input for [`build_epochs`].
pub fn merge_windows(windows: &[(u64, u64)], total_samples: u64) -> Vec<(u64, u64)> {
    let mut sorted: Vec<(u64, u64)> = windows
        .iter()
        .filter(|&&(start, length)| length > 0 && start < total_samples)
        .map(|&(start, length)| (start, (start + length).min(total_samples)))
        .collect();
    sorted.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .map(|(start, end)| (start, end - start))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_two_crossings_with_leading_gap() {
        let epochs = build_epochs(10_000, &[(100, 50), (5000, 50)]).unwrap();
        assert_eq!(
            epochs,
            vec![
                Epoch::new(0, 100, EpochKind::Gap),
                Epoch::new(100, 50, EpochKind::Crossing),
                Epoch::new(150, 4850, EpochKind::Gap),
                Epoch::new(5000, 50, EpochKind::Crossing),
                Epoch::new(5050, 4950, EpochKind::Gap),
            ]
        );
        assert_eq!(total_length(&epochs), 10_000);
        validate_epochs(10_000, &epochs).unwrap();
    }

    #[test]
    fn test_window_at_recording_edges() {
        let epochs = build_epochs(200, &[(0, 50), (150, 50)]).unwrap();
        assert_eq!(epochs.len(), 3);
        assert_eq!(epochs[0].kind, EpochKind::Crossing);
        assert_eq!(epochs[1], Epoch::new(50, 100, EpochKind::Gap));
        assert_eq!(epochs[2].kind, EpochKind::Crossing);
    }

    #[test]
    fn test_unsorted_windows_are_sorted() {
        let epochs = build_epochs(1000, &[(500, 10), (100, 10)]).unwrap();
        let crossings: Vec<u64> = epochs
            .iter()
            .filter(|e| e.kind == EpochKind::Crossing)
            .map(|e| e.start_sample)
            .collect();
        assert_eq!(crossings, vec![100, 500]);
    }

    #[test]
    fn test_no_windows_is_one_gap() {
        let epochs = build_epochs(1000, &[]).unwrap();
        assert_eq!(epochs, vec![Epoch::new(0, 1000, EpochKind::Gap)]);
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let err = build_epochs(1000, &[(100, 50), (120, 50)]).unwrap_err();
        assert!(matches!(err, TintError::InvalidEpoch(_)));
    }

    #[test]
    fn test_window_past_end_rejected() {
        let err = build_epochs(1000, &[(990, 20)]).unwrap_err();
        assert!(matches!(err, TintError::InvalidEpoch(_)));
    }

    #[test]
    fn test_zero_length_window_rejected() {
        assert!(build_epochs(1000, &[(10, 0)]).is_err());
    }

    #[test]
    fn test_continuous_epochs() {
        let epochs = continuous_epochs(48_000).unwrap();
        assert_eq!(epochs, vec![Epoch::new(0, 48_000, EpochKind::Continuous)]);
        assert!(continuous_epochs(0).is_err());
    }

    #[test]
    fn test_validate_detects_hole() {
        let epochs = vec![
            Epoch::new(0, 10, EpochKind::Gap),
            Epoch::new(20, 10, EpochKind::Crossing),
        ];
        assert!(validate_epochs(30, &epochs).is_err());
    }

    #[test]
    fn test_merge_windows() {
        let merged = merge_windows(&[(100, 50), (120, 50), (300, 10), (995, 50)], 1000);
        assert_eq!(merged, vec![(100, 70), (300, 10), (995, 5)]);
    }

    #[test]
    fn test_kind_round_trips_through_text() {
        for kind in [
            EpochKind::Continuous,
            EpochKind::Crossing,
            EpochKind::Gap,
            EpochKind::Synthesized,
        ] {
            assert_eq!(kind.as_str().parse::<EpochKind>().unwrap(), kind);
        }
        assert!("noise".parse::<EpochKind>().is_err());
    }

    #[test]
    fn test_pseudo_random_windows_tile_recording() {
        let mut rng = StdRng::seed_from_u64(12345);
        for _ in 0..200 {
            let total = rng.random_range(1000..6000u64);
            let mut windows = Vec::new();
            let mut cursor = 0u64;
            loop {
                let skip = rng.random_range(0..300u64);
                let len = rng.random_range(1..=60u64);
                if cursor + skip + len > total {
                    break;
                }
                windows.push((cursor + skip, len));
                cursor += skip + len;
            }
            let epochs = build_epochs(total, &windows).unwrap();
            validate_epochs(total, &epochs).unwrap();
            assert_eq!(total_length(&epochs), total);
            let crossings = epochs.iter().filter(|e| e.kind == EpochKind::Crossing).count();
            assert_eq!(crossings, windows.len());
        }
    }
}
