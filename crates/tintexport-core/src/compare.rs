//! Spike timestamp comparison between two TINT datasets
//!
//! Spikes of the original dataset are matched to spikes of the exported one
//! within a tolerance window. Each original spike takes at most one exported
//! spike; exported spikes left over are spurious. Spurious spikes falling
//! outside every real epoch of the original are attributed to synthesized
//! signal.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use crate::config::{CompareConfig, MatchScope};
use crate::dataset::{EpochTrace, TetrodeData, TintDataset};
use crate::epoch::EpochKind;
use crate::error::{Result, TintError};
use crate::source::Recording;

/// How an original spike relates to the exported dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Matched at the same sample
    Exact,
    /// Matched within tolerance at a different sample
    Shifted,
    /// Exported spike with no original counterpart
    Spurious,
    /// Original spike with no exported counterpart
    Missing,
}

/// One matched or unmatched spike
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MismatchRecord {
    pub tetrode: usize,
    /// Unit label of the original spike, or of the exported one if spurious
    pub unit_id: u32,
    pub exported_unit_id: Option<u32>,
    pub original_timestamp: Option<u64>,
    pub exported_timestamp: Option<u64>,
    /// `exported - original` in samples
    pub offset_samples: Option<i64>,
    pub classification: Classification,
    /// Exported spike lies outside every real epoch of the original
    pub in_synthesized: bool,
}

/// Result of matching two sorted timestamp lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikePair {
    Matched { original: usize, exported: usize },
    Missing(usize),
    Spurious(usize),
}

/// Greedy nearest match of two ascending timestamp lists
///
/// Original spikes are visited in order; each takes the closest unmatched
/// exported spike within `tolerance`, the earlier one on a tie. Pairs come
/// back in original order followed by the spurious exported spikes.
pub fn match_spikes(original: &[u64], exported: &[u64], tolerance: u64) -> Vec<SpikePair> {
    let mut taken = vec![false; exported.len()];
    let mut pairs = Vec::with_capacity(original.len().max(exported.len()));

    for (i, &ts) in original.iter().enumerate() {
        let lo = ts.saturating_sub(tolerance);
        let hi = ts.saturating_add(tolerance);
        let first = exported.partition_point(|&e| e < lo);

        let mut best: Option<(u64, usize)> = None;
        for (j, &e) in exported.iter().enumerate().skip(first) {
            if e > hi {
                break;
            }
            if taken[j] {
                continue;
            }
            let distance = e.abs_diff(ts);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, j));
            }
        }

        match best {
            Some((_, j)) => {
                taken[j] = true;
                pairs.push(SpikePair::Matched {
                    original: i,
                    exported: j,
                });
            }
            None => pairs.push(SpikePair::Missing(i)),
        }
    }

    pairs.extend(
        taken
            .iter()
            .enumerate()
            .filter(|(_, &t)| !t)
            .map(|(j, _)| SpikePair::Spurious(j)),
    );
    pairs
}

/// Per-tetrode counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TetrodeSummary {
    pub tetrode: usize,
    pub original_spikes: usize,
    pub exported_spikes: usize,
    pub original_units: usize,
    pub exported_units: usize,
    pub exact: usize,
    pub shifted: usize,
    pub missing: usize,
    pub spurious: usize,
    pub spurious_in_synthesized: usize,
    /// Crossing epochs of the original holding more than one exported spike
    pub snippets_with_multiple_spikes: usize,
    /// Exported crossing epochs with no real counterpart in the original
    pub inferred_synthesized_epochs: usize,
    pub mean_abs_offset: Option<f64>,
    /// Standard error of the signed offset of matched spikes
    pub stderr_offset: Option<f64>,
}

/// Aggregate figures over all tetrodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchStatistics {
    pub original_spikes: usize,
    pub exported_spikes: usize,
    pub matched: usize,
    /// Matched share of the original spikes
    pub match_rate: f64,
    pub mean_abs_offset: Option<f64>,
    pub median_abs_offset: Option<f64>,
    pub spurious_in_synthesized: usize,
    pub spurious_elsewhere: usize,
}

/// Output of [`Comparator::compare`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MismatchReport {
    pub tolerance_samples: u64,
    pub scope: MatchScope,
    pub statistics: MatchStatistics,
    pub tetrodes: Vec<TetrodeSummary>,
    pub records: Vec<MismatchRecord>,
}

impl MismatchReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.records
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }

    pub fn tetrode(&self, tetrode: usize) -> Option<&TetrodeSummary> {
        self.tetrodes.iter().find(|t| t.tetrode == tetrode)
    }
}

/// `(timestamp, label)` lists keyed by match group
type Groups = BTreeMap<u32, Vec<(u64, u32)>>;

fn group_spikes(data: Option<&TetrodeData>, scope: MatchScope) -> Groups {
    let mut groups = Groups::new();
    let Some(data) = data else {
        return groups;
    };
    for (spike, &label) in data.spikes.iter().zip(&data.labels) {
        let key = match scope {
            MatchScope::Unit => label,
            MatchScope::Tetrode => 0,
        };
        groups
            .entry(key)
            .or_default()
            .push((spike.timestamp, label));
    }
    groups
}

/// Mean and standard error of the mean, population variance
fn mean_and_stderr(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt() / n.sqrt()))
}

fn median(values: &mut [u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) as f64 / 2.0
    } else {
        values[mid] as f64
    })
}

/// Compares spike timestamps of two datasets
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    config: CompareConfig,
}

impl Comparator {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// Open both datasets and compare them
    pub fn compare(&self, original: &Path, exported: &Path) -> Result<MismatchReport> {
        let original = TintDataset::open(original)?;
        let exported = TintDataset::open(exported)?;
        self.compare_datasets(&original, &exported)
    }

    pub fn compare_datasets(
        &self,
        original: &TintDataset,
        exported: &TintDataset,
    ) -> Result<MismatchReport> {
        check_compatible(original, exported)?;

        let original_trace = original.epoch_trace()?;
        let mut exported_trace = exported.epoch_trace()?;
        exported_trace.infer_synthesized(&original_trace);

        tracing::info!(
            original = %original.set_path().display(),
            exported = %exported.set_path().display(),
            tolerance = self.config.tolerance_samples,
            scope = ?self.config.scope,
            "Comparing datasets"
        );

        let tetrodes: BTreeSet<usize> = original
            .tetrode_data()
            .iter()
            .chain(exported.tetrode_data())
            .map(|t| t.tetrode)
            .collect();

        let mut records = Vec::new();
        let mut summaries = Vec::with_capacity(tetrodes.len());
        for tetrode in tetrodes {
            let (summary, tetrode_records) = self.compare_tetrode(
                tetrode,
                original.tetrode(tetrode),
                exported.tetrode(tetrode),
                &original_trace,
                &exported_trace,
            );
            tracing::debug!(
                tetrode,
                exact = summary.exact,
                shifted = summary.shifted,
                missing = summary.missing,
                spurious = summary.spurious,
                "Tetrode compared"
            );
            summaries.push(summary);
            records.extend(tetrode_records);
        }

        let statistics = statistics(&summaries, &records);
        tracing::info!(
            match_rate = statistics.match_rate,
            matched = statistics.matched,
            spurious_in_synthesized = statistics.spurious_in_synthesized,
            spurious_elsewhere = statistics.spurious_elsewhere,
            "Comparison complete"
        );

        Ok(MismatchReport {
            tolerance_samples: self.config.tolerance_samples,
            scope: self.config.scope,
            statistics,
            tetrodes: summaries,
            records,
        })
    }

    fn compare_tetrode(
        &self,
        tetrode: usize,
        original: Option<&TetrodeData>,
        exported: Option<&TetrodeData>,
        original_trace: &EpochTrace,
        exported_trace: &EpochTrace,
    ) -> (TetrodeSummary, Vec<MismatchRecord>) {
        let outside_real = |sample: u64| {
            !original_trace
                .kind_at(tetrode, sample)
                .is_some_and(|k| k.is_real())
        };

        let mut original_groups = group_spikes(original, self.config.scope);
        let mut exported_groups = group_spikes(exported, self.config.scope);
        let keys: BTreeSet<u32> = original_groups
            .keys()
            .chain(exported_groups.keys())
            .copied()
            .collect();

        let mut records = Vec::new();
        for key in keys {
            let orig = original_groups.remove(&key).unwrap_or_default();
            let exp = exported_groups.remove(&key).unwrap_or_default();
            let orig_ts: Vec<u64> = orig.iter().map(|&(t, _)| t).collect();
            let exp_ts: Vec<u64> = exp.iter().map(|&(t, _)| t).collect();

            for pair in match_spikes(&orig_ts, &exp_ts, self.config.tolerance_samples) {
                let record = match pair {
                    SpikePair::Matched {
                        original: i,
                        exported: j,
                    } => {
                        let (o, label) = orig[i];
                        let (e, exported_label) = exp[j];
                        let offset = e as i64 - o as i64;
                        MismatchRecord {
                            tetrode,
                            unit_id: label,
                            exported_unit_id: Some(exported_label),
                            original_timestamp: Some(o),
                            exported_timestamp: Some(e),
                            offset_samples: Some(offset),
                            classification: if offset == 0 {
                                Classification::Exact
                            } else {
                                Classification::Shifted
                            },
                            in_synthesized: outside_real(e),
                        }
                    }
                    SpikePair::Missing(i) => {
                        let (o, label) = orig[i];
                        MismatchRecord {
                            tetrode,
                            unit_id: label,
                            exported_unit_id: None,
                            original_timestamp: Some(o),
                            exported_timestamp: None,
                            offset_samples: None,
                            classification: Classification::Missing,
                            in_synthesized: false,
                        }
                    }
                    SpikePair::Spurious(j) => {
                        let (e, exported_label) = exp[j];
                        MismatchRecord {
                            tetrode,
                            unit_id: exported_label,
                            exported_unit_id: Some(exported_label),
                            original_timestamp: None,
                            exported_timestamp: Some(e),
                            offset_samples: None,
                            classification: Classification::Spurious,
                            in_synthesized: outside_real(e),
                        }
                    }
                };
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.original_timestamp.or(r.exported_timestamp));

        let count = |c: Classification| records.iter().filter(|r| r.classification == c).count();
        let offsets: Vec<f64> = records
            .iter()
            .filter_map(|r| r.offset_samples)
            .map(|o| o as f64)
            .collect();
        let abs_offsets: Vec<f64> = offsets.iter().map(|o| o.abs()).collect();

        let exported_times: Vec<u64> = exported
            .map(|t| t.spikes.iter().map(|s| s.timestamp).collect())
            .unwrap_or_default();
        let snippets_with_multiple_spikes = original_trace
            .crossing_epochs(tetrode)
            .filter(|epoch| {
                let lo = exported_times.partition_point(|&t| t < epoch.start_sample);
                let hi = exported_times.partition_point(|&t| t < epoch.end_sample());
                hi - lo > 1
            })
            .count();

        let summary = TetrodeSummary {
            tetrode,
            original_spikes: original.map_or(0, |t| t.spikes.len()),
            exported_spikes: exported_times.len(),
            original_units: original.map_or(0, |t| t.unit_labels().len()),
            exported_units: exported.map_or(0, |t| t.unit_labels().len()),
            exact: count(Classification::Exact),
            shifted: count(Classification::Shifted),
            missing: count(Classification::Missing),
            spurious: count(Classification::Spurious),
            spurious_in_synthesized: records
                .iter()
                .filter(|r| r.classification == Classification::Spurious && r.in_synthesized)
                .count(),
            snippets_with_multiple_spikes,
            inferred_synthesized_epochs: exported_trace
                .epochs(tetrode)
                .iter()
                .filter(|e| e.kind == EpochKind::Synthesized)
                .count(),
            mean_abs_offset: mean_and_stderr(&abs_offsets).map(|(m, _)| m),
            stderr_offset: mean_and_stderr(&offsets).map(|(_, se)| se),
        };
        (summary, records)
    }
}

fn statistics(summaries: &[TetrodeSummary], records: &[MismatchRecord]) -> MatchStatistics {
    let original_spikes: usize = summaries.iter().map(|s| s.original_spikes).sum();
    let exported_spikes: usize = summaries.iter().map(|s| s.exported_spikes).sum();
    let matched: usize = summaries.iter().map(|s| s.exact + s.shifted).sum();
    let match_rate = if original_spikes > 0 {
        matched as f64 / original_spikes as f64
    } else if exported_spikes == 0 {
        1.0
    } else {
        0.0
    };

    let mut abs_offsets: Vec<u64> = records
        .iter()
        .filter_map(|r| r.offset_samples)
        .map(i64::unsigned_abs)
        .collect();
    let mean_abs_offset = (!abs_offsets.is_empty())
        .then(|| abs_offsets.iter().sum::<u64>() as f64 / abs_offsets.len() as f64);
    let median_abs_offset = median(&mut abs_offsets);

    let spurious_in_synthesized: usize = summaries.iter().map(|s| s.spurious_in_synthesized).sum();
    let spurious: usize = summaries.iter().map(|s| s.spurious).sum();

    MatchStatistics {
        original_spikes,
        exported_spikes,
        matched,
        match_rate,
        mean_abs_offset,
        median_abs_offset,
        spurious_in_synthesized,
        spurious_elsewhere: spurious - spurious_in_synthesized,
    }
}

fn check_compatible(original: &TintDataset, exported: &TintDataset) -> Result<()> {
    let checks = [
        (
            "sample_rate",
            original.sample_rate() as u64,
            exported.sample_rate() as u64,
        ),
        (
            "channel_count",
            original.channel_count() as u64,
            exported.channel_count() as u64,
        ),
        ("duration", original.duration_secs(), exported.duration_secs()),
    ];
    for (field, a, b) in checks {
        if a != b {
            return Err(TintError::DatasetMismatch {
                field,
                original: a.to_string(),
                exported: b.to_string(),
            });
        }
    }
    Ok(())
}
