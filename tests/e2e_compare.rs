//! E2E tests for the timestamp comparator
//!
//! Datasets are written with the TINT writer and compared back, covering
//! self comparison, constant shifts, unit relabelling, spurious spikes in
//! synthesized signal and the dataset preconditions.

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use tintexport::{
    compare, Classification, Comparator, CompareConfig, ExportConfig, InMemoryRecording,
    InMemorySorting, MatchScope, TintError, TintWriter,
};

const RATE: u32 = 48000;

fn write_reference(dir: &Path) -> PathBuf {
    let path = dir.join("reference.set");
    let text = format!(
        "trial_date Tuesday, 4 May 2021\r\n\
         experimenter lab\r\n\
         duration 900\r\n\
         sw_version 1.2.2.16\r\n\
         rawRate {RATE}\r\n\
         pretrigSamps 10\r\n\
         spikeLockout 40\r\n"
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn raw_recording(channels: usize, samples: usize) -> InMemoryRecording {
    let data = (0..channels)
        .map(|ch| {
            (0..samples)
                .map(|i| (((i * 13 + ch * 7) % 500) as i16 - 250) * 40)
                .collect()
        })
        .collect();
    InMemoryRecording::new(RATE, data)
}

/// Write `name.set` and its tetrode files into `dir`
fn export(
    dir: &Path,
    name: &str,
    recording: &InMemoryRecording,
    units: &[(u32, usize, Vec<u64>)],
) -> PathBuf {
    let reference = write_reference(dir);
    let mut sorting = InMemorySorting::new();
    for (unit, tetrode, spikes) in units {
        sorting.add_unit(*unit, *tetrode, spikes.clone());
    }
    let output = dir.join(format!("{name}.set"));
    TintWriter::new(ExportConfig::default())
        .write(recording, &sorting, &output, &reference)
        .unwrap();
    output
}

fn spikes(first: u64, step: u64, count: u64) -> Vec<u64> {
    (0..count).map(|i| first + i * step).collect()
}

fn shifted(spikes: &[u64], offset: i64) -> Vec<u64> {
    spikes.iter().map(|&s| (s as i64 + offset) as u64).collect()
}

#[test]
fn test_self_comparison_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let recording = raw_recording(8, 96000);
    let set = export(
        dir.path(),
        "trial",
        &recording,
        &[
            (1, 1, spikes(100, 1000, 90)),
            (2, 1, spikes(600, 1500, 60)),
            (3, 2, spikes(250, 700, 120)),
        ],
    );

    let report = compare(&set, &set).unwrap();
    assert_eq!(report.count(Classification::Exact), 270);
    assert_eq!(report.count(Classification::Shifted), 0);
    assert_eq!(report.count(Classification::Missing), 0);
    assert_eq!(report.count(Classification::Spurious), 0);
    assert_relative_eq!(report.statistics.match_rate, 1.0);
    assert_eq!(report.statistics.mean_abs_offset, Some(0.0));
    assert_eq!(report.statistics.median_abs_offset, Some(0.0));

    let t1 = report.tetrode(1).unwrap();
    assert_eq!(t1.original_units, 2);
    assert_eq!(t1.exact, 150);
    assert_eq!(t1.stderr_offset, Some(0.0));
    assert_eq!(report.tetrode(2).unwrap().exact, 120);
}

#[test]
fn test_constant_shift_within_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let recording = raw_recording(4, 96000);
    let a = spikes(200, 1000, 90);
    let b = spikes(700, 3000, 30);
    let original = export(dir.path(), "original", &recording, &[(1, 1, a.clone()), (2, 1, b.clone())]);

    for offset in [7i64, -7] {
        let name = format!("shift{}", offset + 100);
        let exported = export(
            dir.path(),
            &name,
            &recording,
            &[(1, 1, shifted(&a, offset)), (2, 1, shifted(&b, offset))],
        );

        let report = compare(&original, &exported).unwrap();
        assert_eq!(report.count(Classification::Shifted), 120);
        assert_eq!(report.count(Classification::Exact), 0);
        assert!(report
            .records
            .iter()
            .all(|r| r.offset_samples == Some(offset)));
        assert_relative_eq!(report.statistics.match_rate, 1.0);
        assert_eq!(report.statistics.mean_abs_offset, Some(7.0));
        assert_eq!(report.statistics.median_abs_offset, Some(7.0));

        let summary = report.tetrode(1).unwrap();
        assert_eq!(summary.shifted, 120);
        assert_eq!(summary.mean_abs_offset, Some(7.0));
        assert_relative_eq!(summary.stderr_offset.unwrap(), 0.0);
    }
}

#[test]
fn test_constant_shift_beyond_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let recording = raw_recording(4, 96000);
    let a = spikes(200, 1000, 90);
    let original = export(dir.path(), "original", &recording, &[(1, 1, a.clone())]);
    let exported = export(dir.path(), "late", &recording, &[(1, 1, shifted(&a, 80))]);

    let report = compare(&original, &exported).unwrap();
    assert_eq!(report.count(Classification::Missing), 90);
    assert_eq!(report.count(Classification::Spurious), 90);
    assert_eq!(report.statistics.matched, 0);
    assert_relative_eq!(report.statistics.match_rate, 0.0);
    assert_eq!(report.statistics.mean_abs_offset, None);
    // The original is a raw recording, so nothing counts as synthesized
    assert_eq!(report.statistics.spurious_in_synthesized, 0);
    assert_eq!(report.statistics.spurious_elsewhere, 90);

    // A wider window matches them again
    let wide = Comparator::new(CompareConfig {
        tolerance_samples: 100,
        ..CompareConfig::default()
    });
    let report = wide.compare(&original, &exported).unwrap();
    assert_eq!(report.count(Classification::Shifted), 90);
}

#[test]
fn test_relabelled_units_match_in_tetrode_scope() {
    let dir = tempfile::tempdir().unwrap();
    let recording = raw_recording(4, 96000);
    let a = spikes(200, 1000, 90);
    let b = spikes(700, 1000, 90);
    let original = export(dir.path(), "original", &recording, &[(1, 1, a.clone()), (2, 1, b.clone())]);
    let exported = export(dir.path(), "swapped", &recording, &[(1, 1, b), (2, 1, a)]);

    let by_unit = compare(&original, &exported).unwrap();
    assert_eq!(by_unit.count(Classification::Missing), 180);
    assert_eq!(by_unit.count(Classification::Spurious), 180);

    let by_tetrode = Comparator::new(CompareConfig {
        scope: MatchScope::Tetrode,
        ..CompareConfig::default()
    })
    .compare(&original, &exported)
    .unwrap();
    assert_eq!(by_tetrode.count(Classification::Exact), 180);
    let record = by_tetrode
        .records
        .iter()
        .find(|r| r.original_timestamp == Some(200))
        .unwrap();
    assert_eq!(record.unit_id, 1);
    assert_eq!(record.exported_unit_id, Some(2));
}

#[test]
fn test_spurious_spikes_in_synthesized_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let samples = 96000;
    let windows: Vec<(u64, u64)> = (1000..95000).step_by(2000).map(|s| (s, 60)).collect();
    let triggers: Vec<u64> = windows.iter().map(|&(s, _)| s + 10).collect();

    let raw = raw_recording(4, samples);
    let unit_mode = raw.clone().with_crossing_windows(windows.clone());
    let original = export(dir.path(), "original", &unit_mode, &[(1, 1, triggers.clone())]);

    // One extra spike deep inside a gap, one inside the first crossing window
    let mut detected = triggers.clone();
    detected.push(50_500);
    detected.push(windows[0].0 + 30);
    let exported = export(dir.path(), "detected", &raw, &[(1, 1, detected)]);

    let report = compare(&original, &exported).unwrap();
    assert_eq!(report.count(Classification::Exact), triggers.len());
    assert_eq!(report.count(Classification::Spurious), 2);
    assert_eq!(report.statistics.spurious_in_synthesized, 1);
    assert_eq!(report.statistics.spurious_elsewhere, 1);

    let gap_spike = report
        .records
        .iter()
        .find(|r| r.exported_timestamp == Some(50_500))
        .unwrap();
    assert_eq!(gap_spike.classification, Classification::Spurious);
    assert!(gap_spike.in_synthesized);

    let summary = report.tetrode(1).unwrap();
    assert_eq!(summary.snippets_with_multiple_spikes, 1);
    assert_eq!(summary.inferred_synthesized_epochs, 0);
}

#[test]
fn test_channel_count_mismatch_fails_before_matching() {
    let dir = tempfile::tempdir().unwrap();
    let four = export(
        dir.path(),
        "four",
        &raw_recording(4, 48000),
        &[(1, 1, spikes(100, 500, 10))],
    );
    let eight = export(
        dir.path(),
        "eight",
        &raw_recording(8, 48000),
        &[(1, 1, spikes(100, 500, 10))],
    );

    match compare(&four, &eight) {
        Err(TintError::DatasetMismatch {
            field,
            original,
            exported,
        }) => {
            assert_eq!(field, "channel_count");
            assert_eq!(original, "4");
            assert_eq!(exported, "8");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_duration_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let short = export(dir.path(), "short", &raw_recording(4, 48000), &[]);
    let long = export(dir.path(), "long", &raw_recording(4, 144000), &[]);

    assert!(matches!(
        compare(&short, &long),
        Err(TintError::DatasetMismatch { field: "duration", .. })
    ));
}

#[test]
fn test_empty_datasets_match_fully() {
    let dir = tempfile::tempdir().unwrap();
    let set = export(dir.path(), "empty", &raw_recording(4, 48000), &[]);

    let report = compare(&set, &set).unwrap();
    assert!(report.records.is_empty());
    assert_relative_eq!(report.statistics.match_rate, 1.0);
    assert_eq!(report.statistics.median_abs_offset, None);
}

#[test]
fn test_report_serializes() {
    let dir = tempfile::tempdir().unwrap();
    let recording = raw_recording(4, 48000);
    let original = export(dir.path(), "original", &recording, &[(1, 1, vec![100, 900])]);
    let exported = export(dir.path(), "exported", &recording, &[(1, 1, vec![103, 5000])]);

    let report = compare(&original, &exported).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tolerance_samples"], 50);
    assert_eq!(json["scope"], "unit");
    let classes: Vec<&str> = json["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["classification"].as_str().unwrap())
        .collect();
    assert_eq!(classes, vec!["shifted", "missing", "spurious"]);
}
