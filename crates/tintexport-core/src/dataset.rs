//! Reading TINT datasets back
//!
//! [`TintDataset`] loads a settings file together with the spike, label and
//! continuous files next to it. It doubles as a unit-mode [`Recording`]
//! (samples are known only inside spike snippets) and as a [`Sorting`]
//! (units from the `.cut` labels), which lets an acquired dataset be
//! resynthesized into a continuous one.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ExportConfig;
use crate::epoch::{build_epochs, merge_windows, validate_epochs, Epoch, EpochKind};
use crate::error::{Result, TintError};
use crate::format::continuous::{read_continuous_header, ContinuousHeader};
use crate::format::cut::{read_clu, read_cut};
use crate::format::set_file::SetFile;
use crate::format::tetrode::{read_tetrode, SpikeRecord, TetrodeLayout};
use crate::format::{base_path, clu_path, continuous_path, cut_path, discover_tetrodes, tetrode_path};
use crate::source::{Recording, Snippet, Sorting};

/// Unit ids exposed through [`Sorting`] are `tetrode * UNIT_ID_STRIDE + label`
pub const UNIT_ID_STRIDE: u32 = 1000;

/// Files of one tetrode
#[derive(Debug, Clone)]
pub struct TetrodeData {
    pub tetrode: usize,
    pub layout: TetrodeLayout,
    /// Spikes in timestamp order
    pub spikes: Vec<SpikeRecord>,
    /// 1-based unit label per spike
    pub labels: Vec<u32>,
    pub continuous: Option<ContinuousHeader>,
}

impl TetrodeData {
    /// Distinct labels, ascending
    pub fn unit_labels(&self) -> Vec<u32> {
        self.labels
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Epoch structure of every tetrode of a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochTrace {
    pub sample_rate: u32,
    pub total_samples: u64,
    pub tetrodes: BTreeMap<usize, Vec<Epoch>>,
}

impl EpochTrace {
    pub fn epochs(&self, tetrode: usize) -> &[Epoch] {
        self.tetrodes.get(&tetrode).map_or(&[], Vec::as_slice)
    }

    pub fn crossing_epochs(&self, tetrode: usize) -> impl Iterator<Item = &Epoch> + '_ {
        self.epochs(tetrode)
            .iter()
            .filter(|e| e.kind == EpochKind::Crossing)
    }

    /// Kind of the epoch holding `sample`, if any
    pub fn kind_at(&self, tetrode: usize, sample: u64) -> Option<EpochKind> {
        let epochs = self.epochs(tetrode);
        let idx = epochs.partition_point(|e| e.end_sample() <= sample);
        epochs
            .get(idx)
            .filter(|e| e.contains(sample))
            .map(|e| e.kind)
    }

    /// Relabel crossing epochs that no real epoch of `original` overlaps
    ///
    /// Such crossings can only come from data that was synthesized on the
    /// way to this dataset. Returns the number of relabelled epochs.
    pub fn infer_synthesized(&mut self, original: &EpochTrace) -> usize {
        let mut relabelled = 0;
        for (tetrode, epochs) in self.tetrodes.iter_mut() {
            let real: Vec<&Epoch> = original
                .epochs(*tetrode)
                .iter()
                .filter(|e| e.kind.is_real())
                .collect();
            for epoch in epochs.iter_mut().filter(|e| e.kind == EpochKind::Crossing) {
                let idx = real.partition_point(|r| r.end_sample() <= epoch.start_sample);
                let matched = real.get(idx).is_some_and(|r| r.overlaps(epoch));
                if !matched {
                    epoch.kind = EpochKind::Synthesized;
                    relabelled += 1;
                }
            }
        }
        relabelled
    }
}

/// Parse a dataset's settings and spike files back into epochs
pub fn load_epoch_trace(set_path: &Path) -> Result<EpochTrace> {
    TintDataset::open(set_path)?.epoch_trace()
}

/// A TINT dataset on disk
#[derive(Debug, Clone)]
pub struct TintDataset {
    set_path: PathBuf,
    set: SetFile,
    sample_rate: u32,
    total_samples: u64,
    pretrig: usize,
    tetrodes: Vec<TetrodeData>,
    /// `(tetrode index, channel within tetrode)` per global channel
    channel_map: Vec<(usize, usize)>,
}

impl TintDataset {
    /// Open the dataset described by `set_path`
    pub fn open(set_path: &Path) -> Result<Self> {
        let set = match SetFile::read(set_path) {
            Err(TintError::MissingReferenceFile { path }) => {
                return Err(TintError::io(
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "settings file not found"),
                ))
            }
            other => other?,
        };
        let base = base_path(set_path);

        let numbers = discover_tetrodes(set_path).map_err(|e| TintError::io(set_path, e))?;
        let mut tetrodes = Vec::with_capacity(numbers.len());
        for tetrode in numbers {
            tetrodes.push(load_tetrode(&base, tetrode)?);
        }

        let sample_rate = set
            .sample_rate()
            .or_else(|| tetrodes.first().map(|t| t.layout.sample_rate))
            .ok_or_else(|| TintError::format(set_path, "sample rate unknown"))?;
        for t in &tetrodes {
            if t.layout.sample_rate != sample_rate {
                return Err(TintError::format(
                    tetrode_path(&base, t.tetrode),
                    format!(
                        "sample rate {} differs from the settings file's {sample_rate}",
                        t.layout.sample_rate
                    ),
                ));
            }
        }

        let pretrig = set
            .pretrig_samples()
            .unwrap_or(ExportConfig::default().default_pretrig_samples);

        let total_samples = tetrodes
            .iter()
            .find_map(|t| t.continuous.as_ref().map(|c| c.num_samples))
            .or_else(|| set.duration_secs().map(|d| d * sample_rate as u64))
            .unwrap_or_else(|| {
                tetrodes
                    .iter()
                    .flat_map(|t| {
                        let span = t.layout.samples_per_spike.saturating_sub(pretrig) as u64;
                        t.spikes.iter().map(move |s| s.timestamp + span)
                    })
                    .max()
                    .unwrap_or(0)
            });

        let channel_map = tetrodes
            .iter()
            .enumerate()
            .flat_map(|(i, t)| (0..t.layout.num_chans).map(move |c| (i, c)))
            .collect();

        tracing::debug!(
            path = %set_path.display(),
            tetrodes = tetrodes.len(),
            sample_rate,
            total_samples,
            "dataset_opened"
        );

        Ok(Self {
            set_path: set_path.to_path_buf(),
            set,
            sample_rate,
            total_samples,
            pretrig,
            tetrodes,
            channel_map,
        })
    }

    pub fn set_path(&self) -> &Path {
        &self.set_path
    }

    pub fn settings(&self) -> &SetFile {
        &self.set
    }

    /// Trial duration in whole seconds
    pub fn duration_secs(&self) -> u64 {
        self.set
            .duration_secs()
            .unwrap_or_else(|| self.total_samples.div_ceil(self.sample_rate as u64))
    }

    pub fn pretrig_samples(&self) -> usize {
        self.pretrig
    }

    pub fn tetrode_data(&self) -> &[TetrodeData] {
        &self.tetrodes
    }

    pub fn tetrode(&self, tetrode: usize) -> Option<&TetrodeData> {
        self.tetrodes.iter().find(|t| t.tetrode == tetrode)
    }

    /// Snippet windows of a tetrode's spikes, merged where they overlap
    pub fn spike_windows(&self, tetrode: usize) -> Vec<(u64, u64)> {
        let Some(data) = self.tetrode(tetrode) else {
            return Vec::new();
        };
        let windows: Vec<(u64, u64)> = data
            .spikes
            .iter()
            .map(|s| {
                let start = s.timestamp as i64 - self.pretrig as i64;
                let len = data.layout.samples_per_spike as i64 + start.min(0);
                (start.max(0) as u64, len.max(0) as u64)
            })
            .collect();
        merge_windows(&windows, self.total_samples)
    }

    /// Epochs of every tetrode
    ///
    /// Tetrodes with a continuous file report its epoch table. Otherwise the
    /// epochs are the merged spike windows and the gaps between them.
    pub fn epoch_trace(&self) -> Result<EpochTrace> {
        let mut tetrodes = BTreeMap::new();
        for data in &self.tetrodes {
            let epochs = match &data.continuous {
                Some(header) => {
                    validate_epochs(header.num_samples, &header.epochs)?;
                    header.epochs.clone()
                }
                None => build_epochs(self.total_samples, &self.spike_windows(data.tetrode))?,
            };
            tetrodes.insert(data.tetrode, epochs);
        }
        Ok(EpochTrace {
            sample_rate: self.sample_rate,
            total_samples: self.total_samples,
            tetrodes,
        })
    }

    fn spikes_of_unit(&self, unit_id: u32) -> impl Iterator<Item = &SpikeRecord> + '_ {
        let tetrode = (unit_id / UNIT_ID_STRIDE) as usize;
        let label = unit_id % UNIT_ID_STRIDE;
        self.tetrode(tetrode)
            .into_iter()
            .flat_map(move |t| {
                t.spikes
                    .iter()
                    .zip(&t.labels)
                    .filter(move |(_, &l)| l == label)
                    .map(|(s, _)| s)
            })
    }
}

fn load_tetrode(base: &Path, tetrode: usize) -> Result<TetrodeData> {
    let spike_path = tetrode_path(base, tetrode);
    let file = read_tetrode(&spike_path)?;

    let cut = cut_path(base, tetrode);
    let clu = clu_path(base, tetrode);
    let labels = if cut.exists() {
        read_cut(&cut)?
    } else if clu.exists() {
        read_clu(&clu)?
    } else {
        tracing::debug!(tetrode, "No cut or clu file, treating spikes as one unit");
        vec![1; file.spikes.len()]
    };
    if labels.len() != file.spikes.len() {
        return Err(TintError::format(
            &spike_path,
            format!(
                "{} spikes but {} unit labels",
                file.spikes.len(),
                labels.len()
            ),
        ));
    }

    let cont = continuous_path(base, tetrode);
    let continuous = if cont.exists() {
        Some(read_continuous_header(&cont)?)
    } else {
        None
    };

    // Keep spikes ordered by time, labels alongside
    let mut paired: Vec<(SpikeRecord, u32)> = file.spikes.into_iter().zip(labels).collect();
    paired.sort_by_key(|(s, l)| (s.timestamp, *l));
    let (spikes, labels) = paired.into_iter().unzip();

    Ok(TetrodeData {
        tetrode,
        layout: file.layout,
        spikes,
        labels,
        continuous,
    })
}

impl Recording for TintDataset {
    fn channel_count(&self) -> usize {
        self.channel_map.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Samples outside every spike snippet read as zero
    fn read(&self, channel: usize, start: u64, len: usize) -> Vec<i16> {
        let mut out = vec![0i16; len];
        let Some(&(index, ch)) = self.channel_map.get(channel) else {
            return out;
        };
        let data = &self.tetrodes[index];
        let span = data.layout.samples_per_spike as i64;
        let r0 = start as i64;
        let r1 = r0 + len as i64;
        let window_start = |s: &SpikeRecord| s.timestamp as i64 - self.pretrig as i64;

        let first = data.spikes.partition_point(|s| window_start(s) + span <= r0);
        for spike in &data.spikes[first..] {
            let w0 = window_start(spike);
            if w0 >= r1 {
                break;
            }
            let samples = &spike.waveform[ch];
            for s in w0.max(r0)..(w0 + span).min(r1) {
                out[(s - r0) as usize] = samples[(s - w0) as usize];
            }
        }
        out
    }

    fn tetrode_of(&self, channel: usize) -> usize {
        self.channel_map
            .get(channel)
            .map_or(0, |&(index, _)| self.tetrodes[index].tetrode)
    }

    fn crossing_windows(&self, tetrode: usize) -> Option<Vec<(u64, u64)>> {
        Some(self.spike_windows(tetrode))
    }
}

impl Sorting for TintDataset {
    fn unit_ids(&self) -> Vec<u32> {
        self.tetrodes
            .iter()
            .flat_map(|t| {
                t.unit_labels()
                    .into_iter()
                    .map(move |label| t.tetrode as u32 * UNIT_ID_STRIDE + label)
            })
            .collect()
    }

    fn unit_tetrode(&self, unit_id: u32) -> usize {
        (unit_id / UNIT_ID_STRIDE) as usize
    }

    fn spike_train(&self, unit_id: u32) -> Vec<u64> {
        self.spikes_of_unit(unit_id).map(|s| s.timestamp).collect()
    }

    fn spike_waveforms(&self, unit_id: u32) -> Option<Vec<Snippet>> {
        Some(
            self.spikes_of_unit(unit_id)
                .map(|s| s.waveform.clone())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(epochs: Vec<Epoch>) -> EpochTrace {
        let total_samples = epochs.iter().map(|e| e.length_samples).sum();
        EpochTrace {
            sample_rate: 48000,
            total_samples,
            tetrodes: BTreeMap::from([(1, epochs)]),
        }
    }

    #[test]
    fn test_kind_at() {
        let t = trace(vec![
            Epoch::new(0, 100, EpochKind::Gap),
            Epoch::new(100, 50, EpochKind::Crossing),
            Epoch::new(150, 50, EpochKind::Gap),
        ]);
        assert_eq!(t.kind_at(1, 0), Some(EpochKind::Gap));
        assert_eq!(t.kind_at(1, 100), Some(EpochKind::Crossing));
        assert_eq!(t.kind_at(1, 149), Some(EpochKind::Crossing));
        assert_eq!(t.kind_at(1, 150), Some(EpochKind::Gap));
        assert_eq!(t.kind_at(1, 200), None);
        assert_eq!(t.kind_at(2, 10), None);
    }

    #[test]
    fn test_infer_synthesized() {
        let original = trace(vec![
            Epoch::new(0, 100, EpochKind::Crossing),
            Epoch::new(100, 900, EpochKind::Synthesized),
        ]);
        let mut exported = trace(vec![
            Epoch::new(0, 50, EpochKind::Gap),
            Epoch::new(50, 60, EpochKind::Crossing),
            Epoch::new(110, 390, EpochKind::Gap),
            Epoch::new(500, 50, EpochKind::Crossing),
            Epoch::new(550, 450, EpochKind::Gap),
        ]);

        assert_eq!(exported.infer_synthesized(&original), 1);
        assert_eq!(exported.kind_at(1, 60), Some(EpochKind::Crossing));
        assert_eq!(exported.kind_at(1, 520), Some(EpochKind::Synthesized));
    }

    #[test]
    fn test_unit_labels() {
        let data = TetrodeData {
            tetrode: 1,
            layout: TetrodeLayout {
                num_chans: 4,
                sample_rate: 48000,
                timebase: 96000,
                samples_per_spike: 50,
            },
            spikes: Vec::new(),
            labels: vec![3, 1, 3, 2],
            continuous: None,
        };
        assert_eq!(data.unit_labels(), vec![1, 2, 3]);
    }
}
