//! TINT writer
//!
//! Serializes a recording and its sorting into a TINT dataset:
//!
//! - `<base>.set` adapted from a reference settings file
//! - `<base>_<n>.cont` continuous waveform per tetrode, gaps of unit-mode
//!   recordings filled with synthesized noise
//! - `<base>.<n>` spike file per tetrode
//! - `<base>_<n>.cut` / `<base>_<n>.clu` unit labels per tetrode
//!
//! All preconditions are checked before the first output file is created.
//! Output files are staged and only moved into place once every tetrode has
//! been written; the settings file goes last.

mod staging;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::ExportConfig;
use crate::epoch::{build_epochs, continuous_epochs, Epoch, EpochKind};
use crate::error::{Result, TintError};
use crate::format::continuous::{self, ContinuousHeader};
use crate::format::set_file::{SetFile, DURATION_KEY};
use crate::format::tetrode::{sample_to_ticks, write_tetrode, SpikeRecord, TetrodeLayout};
use crate::format::{base_path, clu_path, continuous_path, cut, cut_path, tetrode_path, HeaderEntries};
use crate::noise::{estimate_noise_model, synthesize, NoiseModel};
use crate::source::{Recording, Snippet, Sorting};
use staging::StagedFile;

/// Samples produced per block while streaming the continuous file
const CHUNK_SAMPLES: u64 = 64 * 1024;

/// What was written for one tetrode
#[derive(Debug, Clone, Serialize)]
pub struct TetrodeExport {
    pub tetrode: usize,
    pub channels: Vec<usize>,
    /// Final epochs; gaps of unit-mode input are labelled synthesized
    pub epochs: Vec<Epoch>,
    /// Noise parameters used for synthesized epochs (unit-mode only)
    pub noise_model: Option<NoiseModel>,
    /// Unit ids in label order (label = index + 1)
    pub units: Vec<u32>,
    pub spike_count: usize,
}

/// Result of a successful export
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub set_path: PathBuf,
    pub sample_rate: u32,
    pub total_samples: u64,
    pub tetrodes: Vec<TetrodeExport>,
}

#[derive(Debug)]
struct PlannedSpike {
    timestamp: u64,
    label: u32,
    waveform: Option<Snippet>,
}

#[derive(Debug)]
struct TetrodePlan {
    tetrode: usize,
    channels: Vec<usize>,
    epochs: Vec<Epoch>,
    units: Vec<u32>,
    spikes: Vec<PlannedSpike>,
    seed: u64,
}

/// Values shared by every tetrode of one export
#[derive(Debug)]
struct ExportContext {
    base: PathBuf,
    preamble: HeaderEntries,
    sample_rate: u32,
    timebase: u32,
    pretrig: usize,
    samples_per_spike: usize,
}

/// Writes TINT datasets
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use tintexport_core::{ExportConfig, InMemoryRecording, InMemorySorting, TintWriter};
///
/// let recording = InMemoryRecording::new(48000, vec![vec![0; 48000]; 4]);
/// let mut sorting = InMemorySorting::new();
/// sorting.add_unit(1, 1, vec![1000, 2000]);
///
/// let writer = TintWriter::new(ExportConfig::default());
/// writer
///     .write(&recording, &sorting, Path::new("out/trial.set"), Path::new("ref/trial.set"))
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct TintWriter {
    config: ExportConfig,
}

impl TintWriter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Write a dataset using a noise generator seeded from the config
    pub fn write(
        &self,
        recording: &dyn Recording,
        sorting: &dyn Sorting,
        output_set_path: &Path,
        reference_set_path: &Path,
    ) -> Result<ExportSummary> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.write_with_rng(
            recording,
            sorting,
            output_set_path,
            reference_set_path,
            &mut rng,
        )
    }

    /// Write a dataset drawing noise from the caller's random source
    ///
    /// One seed per tetrode is drawn from `rng` in tetrode order, so the
    /// output does not depend on whether tetrodes are written in parallel.
    pub fn write_with_rng<R: Rng + ?Sized>(
        &self,
        recording: &dyn Recording,
        sorting: &dyn Sorting,
        output_set_path: &Path,
        reference_set_path: &Path,
        rng: &mut R,
    ) -> Result<ExportSummary> {
        let mut set = SetFile::read(reference_set_path)?;
        check_output_path(output_set_path, reference_set_path)?;

        let sample_rate = set.sample_rate().ok_or_else(|| {
            TintError::format(reference_set_path, "no rawRate entry in settings file")
        })?;
        if sample_rate != recording.sample_rate() {
            return Err(TintError::IncompatibleSamplingRate {
                recording: recording.sample_rate(),
                reference: sample_rate,
                path: reference_set_path.to_path_buf(),
            });
        }

        let total_samples = recording.total_samples();
        let timebase = self.config.timebase_hz;
        if sample_to_ticks(total_samples, sample_rate, timebase) > u32::MAX as u64 {
            return Err(TintError::InvalidOutput {
                path: output_set_path.to_path_buf(),
                reason: format!(
                    "{total_samples} samples do not fit 32-bit timestamps at {timebase} Hz"
                ),
            });
        }

        let pretrig = set
            .pretrig_samples()
            .unwrap_or(self.config.default_pretrig_samples);
        let lockout = set
            .spike_lockout()
            .unwrap_or(self.config.default_lockout_samples);
        if pretrig + lockout == 0 {
            return Err(TintError::format(
                reference_set_path,
                "spike window of zero samples",
            ));
        }

        let plans = plan_tetrodes(recording, sorting, total_samples, rng)?;
        if plans.is_empty() {
            return Err(TintError::InvalidOutput {
                path: output_set_path.to_path_buf(),
                reason: "recording has no channels".to_string(),
            });
        }

        set.set(DURATION_KEY, duration_secs(total_samples, sample_rate).to_string());
        let ctx = ExportContext {
            base: base_path(output_set_path),
            preamble: set.preamble(),
            sample_rate,
            timebase,
            pretrig,
            samples_per_spike: pretrig + lockout,
        };

        tracing::info!(
            output = %output_set_path.display(),
            reference = %reference_set_path.display(),
            tetrodes = plans.len(),
            total_samples,
            sample_rate,
            "Exporting TINT dataset"
        );

        let results: Vec<Result<(TetrodeExport, Vec<StagedFile>)>> =
            if self.config.parallel_tetrodes && plans.len() > 1 {
                let ctx = &ctx;
                std::thread::scope(|scope| {
                    let handles: Vec<_> = plans
                        .into_iter()
                        .map(|plan| scope.spawn(move || export_tetrode(recording, plan, ctx)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                        .collect()
                })
            } else {
                plans
                    .into_iter()
                    .map(|plan| export_tetrode(recording, plan, &ctx))
                    .collect()
            };

        let mut tetrodes = Vec::with_capacity(results.len());
        let mut staged = Vec::new();
        for result in results {
            let (export, files) = result?;
            tetrodes.push(export);
            staged.extend(files);
        }

        for file in staged {
            file.persist()?;
        }

        let mut set_file = StagedFile::create(output_set_path)?;
        let set_target = set_file.target().to_path_buf();
        set_file.write_with(|w| set.write_to(w).map_err(|e| TintError::io(&set_target, e)))?;
        set_file.persist()?;

        tracing::info!(
            output = %output_set_path.display(),
            tetrodes = tetrodes.len(),
            spikes = tetrodes.iter().map(|t| t.spike_count).sum::<usize>(),
            "Export complete"
        );

        Ok(ExportSummary {
            set_path: output_set_path.to_path_buf(),
            sample_rate,
            total_samples,
            tetrodes,
        })
    }
}

/// Whole seconds covering `total_samples`
fn duration_secs(total_samples: u64, sample_rate: u32) -> u64 {
    total_samples.div_ceil(sample_rate as u64)
}

fn check_output_path(output: &Path, reference: &Path) -> Result<()> {
    let same = match (output.canonicalize(), reference.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => output == reference,
    };
    if same {
        return Err(TintError::InvalidOutput {
            path: output.to_path_buf(),
            reason: "output would overwrite the reference settings file".to_string(),
        });
    }
    Ok(())
}

/// Resolve epochs and spikes of every tetrode; nothing is written here
fn plan_tetrodes<R: Rng + ?Sized>(
    recording: &dyn Recording,
    sorting: &dyn Sorting,
    total_samples: u64,
    rng: &mut R,
) -> Result<Vec<TetrodePlan>> {
    let tetrodes = recording.tetrodes();

    let mut units_by_tetrode: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    for unit in sorting.unit_ids() {
        let tetrode = sorting.unit_tetrode(unit);
        if !tetrodes.contains(&tetrode) {
            return Err(TintError::UnknownTetrode {
                unit_id: unit,
                tetrode,
            });
        }
        units_by_tetrode.entry(tetrode).or_default().push(unit);
    }

    let mut plans = Vec::with_capacity(tetrodes.len());
    for tetrode in tetrodes {
        let epochs = match recording.crossing_windows(tetrode) {
            Some(windows) => build_epochs(total_samples, &windows)?,
            None => continuous_epochs(total_samples)?,
        };

        let mut units = units_by_tetrode.remove(&tetrode).unwrap_or_default();
        units.sort_unstable();

        let mut spikes = Vec::new();
        for (index, &unit) in units.iter().enumerate() {
            let label = index as u32 + 1;
            let train = sorting.spike_train(unit);
            let mut waveforms = sorting.spike_waveforms(unit);
            if waveforms.as_ref().is_some_and(|w| w.len() != train.len()) {
                tracing::warn!(
                    unit,
                    spikes = train.len(),
                    "Waveform count differs from spike count, cutting snippets from the recording"
                );
                waveforms = None;
            }

            let mut waveforms = waveforms.map(Vec::into_iter);
            for timestamp in train {
                if timestamp >= total_samples {
                    return Err(TintError::UnitOutOfRange {
                        unit_id: unit,
                        tetrode,
                        sample: timestamp,
                        total_samples,
                    });
                }
                spikes.push(PlannedSpike {
                    timestamp,
                    label,
                    waveform: waveforms.as_mut().and_then(|it| it.next()),
                });
            }
        }
        spikes.sort_by_key(|s| (s.timestamp, s.label));

        plans.push(TetrodePlan {
            tetrode,
            channels: recording.tetrode_channels(tetrode),
            epochs,
            units,
            spikes,
            seed: rng.random(),
        });
    }
    Ok(plans)
}

/// Pad or cut a snippet to `channels x samples`
fn fit_snippet(mut snippet: Snippet, channels: usize, samples: usize) -> Snippet {
    snippet.resize(channels, Vec::new());
    for channel in &mut snippet {
        channel.resize(samples, 0);
    }
    snippet
}

/// Copies samples of a streamed block into the snippets it overlaps
struct SnippetCollector {
    starts: Vec<i64>,
    snippets: Vec<Snippet>,
    needed: Vec<bool>,
    samples_per_spike: i64,
    next_open: usize,
}

impl SnippetCollector {
    fn new(
        spikes: &mut [PlannedSpike],
        channels: usize,
        pretrig: usize,
        samples_per_spike: usize,
    ) -> Self {
        let starts = spikes
            .iter()
            .map(|s| s.timestamp as i64 - pretrig as i64)
            .collect();
        let needed = spikes.iter().map(|s| s.waveform.is_none()).collect();
        let snippets = spikes
            .iter_mut()
            .map(|s| match s.waveform.take() {
                Some(w) => fit_snippet(w, channels, samples_per_spike),
                None => vec![vec![0; samples_per_spike]; channels],
            })
            .collect();
        Self {
            starts,
            snippets,
            needed,
            samples_per_spike: samples_per_spike as i64,
            next_open: 0,
        }
    }

    /// `block` holds samples `[block_start, block_start + len)` per channel
    fn collect(&mut self, block_start: u64, block: &[Vec<i16>]) {
        let len = block.first().map_or(0, Vec::len) as i64;
        let b0 = block_start as i64;
        let b1 = b0 + len;

        // Windows share one length, so they end in the same order they start
        while self.next_open < self.starts.len()
            && self.starts[self.next_open] + self.samples_per_spike <= b0
        {
            self.next_open += 1;
        }

        for j in self.next_open..self.starts.len() {
            let w0 = self.starts[j];
            if w0 >= b1 {
                break;
            }
            if !self.needed[j] {
                continue;
            }
            let from = w0.max(b0);
            let to = (w0 + self.samples_per_spike).min(b1);
            for (channel, samples) in self.snippets[j].iter_mut().zip(block) {
                for s in from..to {
                    channel[(s - w0) as usize] = samples[(s - b0) as usize];
                }
            }
        }
    }
}

fn export_tetrode(
    recording: &dyn Recording,
    plan: TetrodePlan,
    ctx: &ExportContext,
) -> Result<(TetrodeExport, Vec<StagedFile>)> {
    let TetrodePlan {
        tetrode,
        channels,
        mut epochs,
        units,
        mut spikes,
        seed,
    } = plan;

    let unit_mode = epochs.iter().any(|e| e.kind == EpochKind::Gap);
    let noise_model = unit_mode.then(|| estimate_noise_model(recording, &channels, &epochs));
    let mut rng = StdRng::seed_from_u64(seed);

    tracing::info!(
        tetrode,
        channels = channels.len(),
        epochs = epochs.len(),
        units = units.len(),
        spikes = spikes.len(),
        unit_mode,
        "Writing tetrode"
    );

    let planned: Vec<Epoch> = epochs
        .iter()
        .map(|e| match e.kind {
            EpochKind::Gap => Epoch::new(e.start_sample, e.length_samples, EpochKind::Synthesized),
            _ => *e,
        })
        .collect();
    let header = ContinuousHeader {
        num_chans: channels.len(),
        sample_rate: ctx.sample_rate,
        num_samples: planned.iter().map(|e| e.length_samples).sum(),
        epochs: planned,
    };

    let mut collector =
        SnippetCollector::new(&mut spikes, channels.len(), ctx.pretrig, ctx.samples_per_spike);

    let mut cont = StagedFile::create(&continuous_path(&ctx.base, tetrode))?;
    let cont_path = cont.target().to_path_buf();
    let io = |e: std::io::Error| TintError::io(&cont_path, e);
    cont.write_with(|w| {
        continuous::write_header(w, &ctx.preamble, &header).map_err(io)?;
        for epoch in epochs.iter_mut() {
            let is_gap = epoch.kind == EpochKind::Gap;
            let mut offset = 0u64;
            while offset < epoch.length_samples {
                let start = epoch.start_sample + offset;
                let len = CHUNK_SAMPLES.min(epoch.length_samples - offset);
                let block = match (&noise_model, is_gap) {
                    (Some(model), true) => {
                        let mut chunk = Epoch::new(start, len, EpochKind::Gap);
                        synthesize(&mut chunk, model, &mut rng)?
                    }
                    _ => channels
                        .iter()
                        .map(|&ch| recording.read(ch, start, len as usize))
                        .collect(),
                };
                continuous::write_frames(w, &block).map_err(io)?;
                collector.collect(start, &block);
                offset += len;
            }
            if is_gap {
                epoch.kind = EpochKind::Synthesized;
            }
        }
        continuous::write_trailer(w).map_err(io)
    })?;
    debug_assert_eq!(epochs, header.epochs);

    let labels: Vec<u32> = spikes.iter().map(|s| s.label).collect();
    let records: Vec<SpikeRecord> = spikes
        .iter()
        .zip(collector.snippets)
        .map(|(spike, waveform)| SpikeRecord {
            timestamp: spike.timestamp,
            waveform,
        })
        .collect();

    let layout = TetrodeLayout {
        num_chans: channels.len(),
        sample_rate: ctx.sample_rate,
        timebase: ctx.timebase,
        samples_per_spike: ctx.samples_per_spike,
    };
    let mut spike_file = StagedFile::create(&tetrode_path(&ctx.base, tetrode))?;
    let spike_path = spike_file.target().to_path_buf();
    spike_file.write_with(|w| {
        write_tetrode(w, &ctx.preamble, &layout, &records).map_err(|e| TintError::io(&spike_path, e))
    })?;

    let cut_target = cut_path(&ctx.base, tetrode);
    let cut_name = cut_target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut cut_file = StagedFile::create(&cut_target)?;
    cut_file.write_with(|w| {
        cut::write_cut(w, &cut_name, &labels).map_err(|e| TintError::io(&cut_target, e))
    })?;

    let clu_target = clu_path(&ctx.base, tetrode);
    let mut clu_file = StagedFile::create(&clu_target)?;
    clu_file.write_with(|w| cut::write_clu(w, &labels).map_err(|e| TintError::io(&clu_target, e)))?;

    let export = TetrodeExport {
        tetrode,
        channels,
        epochs,
        noise_model,
        units,
        spike_count: records.len(),
    };
    Ok((export, vec![cont, spike_file, cut_file, clu_file]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike(timestamp: u64, waveform: Option<Snippet>) -> PlannedSpike {
        PlannedSpike {
            timestamp,
            label: 1,
            waveform,
        }
    }

    #[test]
    fn test_duration_rounds_up() {
        assert_eq!(duration_secs(48000, 48000), 1);
        assert_eq!(duration_secs(48001, 48000), 2);
        assert_eq!(duration_secs(1, 48000), 1);
    }

    #[test]
    fn test_fit_snippet() {
        let fitted = fit_snippet(vec![vec![1, 2, 3]], 2, 2);
        assert_eq!(fitted, vec![vec![1, 2], vec![0, 0]]);
    }

    #[test]
    fn test_collector_spans_blocks() {
        let mut spikes = vec![spike(3, None), spike(8, None)];
        let mut collector = SnippetCollector::new(&mut spikes, 1, 2, 4);

        let signal: Vec<i16> = (0..12).collect();
        for (start, chunk) in [(0u64, &signal[0..5]), (5, &signal[5..9]), (9, &signal[9..12])] {
            collector.collect(start, &[chunk.to_vec()]);
        }

        assert_eq!(collector.snippets[0], vec![vec![1, 2, 3, 4]]);
        assert_eq!(collector.snippets[1], vec![vec![6, 7, 8, 9]]);
    }

    #[test]
    fn test_collector_pads_before_start() {
        let mut spikes = vec![spike(0, None)];
        let mut collector = SnippetCollector::new(&mut spikes, 1, 2, 4);
        collector.collect(0, &[vec![5, 6, 7]]);
        assert_eq!(collector.snippets[0], vec![vec![0, 0, 5, 6]]);
    }

    #[test]
    fn test_collector_keeps_provided_waveforms() {
        let mut spikes = vec![spike(3, Some(vec![vec![9; 4]]))];
        let mut collector = SnippetCollector::new(&mut spikes, 1, 2, 4);
        collector.collect(0, &[vec![1; 10]]);
        assert_eq!(collector.snippets[0], vec![vec![9; 4]]);
    }
}
