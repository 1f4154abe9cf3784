//! Read-only views of the upstream recording and sorting
//!
//! The writer never depends on a concrete spike-sorting library. Anything
//! that can report channel data and spike trains through these traits can be
//! exported to TINT.

use std::collections::BTreeMap;

/// Waveform snippet of one spike: `channels x samples`
pub type Snippet = Vec<Vec<i16>>;

/// Number of channels in one tetrode
pub const CHANNELS_PER_TETRODE: usize = 4;

/// Recording collaborator
pub trait Recording: Send + Sync {
    fn channel_count(&self) -> usize;

    /// Sample rate in Hz
    fn sample_rate(&self) -> u32;

    fn total_samples(&self) -> u64;

    /// Read `len` samples of `channel` starting at `start`
    ///
    /// Ranges reaching past the end of the recording are zero-padded.
    fn read(&self, channel: usize, start: u64, len: usize) -> Vec<i16>;

    /// 1-based tetrode number owning `channel`
    fn tetrode_of(&self, channel: usize) -> usize {
        channel / CHANNELS_PER_TETRODE + 1
    }

    /// Sample windows `(start, length)` holding real data in a unit-mode
    /// recording, or `None` for a raw continuous recording
    fn crossing_windows(&self, _tetrode: usize) -> Option<Vec<(u64, u64)>> {
        None
    }

    /// Tetrode numbers present in the recording, ascending
    fn tetrodes(&self) -> Vec<usize> {
        let mut tetrodes: Vec<usize> = (0..self.channel_count())
            .map(|ch| self.tetrode_of(ch))
            .collect();
        tetrodes.sort_unstable();
        tetrodes.dedup();
        tetrodes
    }

    /// Channels of `tetrode`, ascending
    fn tetrode_channels(&self, tetrode: usize) -> Vec<usize> {
        (0..self.channel_count())
            .filter(|&ch| self.tetrode_of(ch) == tetrode)
            .collect()
    }
}

/// Sorting collaborator
pub trait Sorting: Send + Sync {
    fn unit_ids(&self) -> Vec<u32>;

    /// 1-based tetrode number the unit was sorted on
    fn unit_tetrode(&self, unit_id: u32) -> usize;

    /// Ascending spike sample indices of the unit
    fn spike_train(&self, unit_id: u32) -> Vec<u64>;

    /// One snippet per spike, aligned with [`Sorting::spike_train`]
    ///
    /// `None` lets the writer cut snippets out of the recording itself.
    fn spike_waveforms(&self, _unit_id: u32) -> Option<Vec<Snippet>> {
        None
    }
}

/// Recording held entirely in memory, one sample vector per channel
#[derive(Debug, Clone)]
pub struct InMemoryRecording {
    sample_rate: u32,
    channels: Vec<Vec<i16>>,
    crossing_windows: Option<BTreeMap<usize, Vec<(u64, u64)>>>,
}

impl InMemoryRecording {
    /// Create a raw continuous recording
    ///
    /// # Panics
    /// Panics if the channels do not all have the same length
    pub fn new(sample_rate: u32, channels: Vec<Vec<i16>>) -> Self {
        if let Some(first) = channels.first() {
            assert!(
                channels.iter().all(|c| c.len() == first.len()),
                "All channels must have the same sample count"
            );
        }
        Self {
            sample_rate,
            channels,
            crossing_windows: None,
        }
    }

    /// Mark the recording as unit-mode with the same crossing windows on
    /// every tetrode
    pub fn with_crossing_windows(mut self, windows: Vec<(u64, u64)>) -> Self {
        let per_tetrode = self
            .tetrodes()
            .into_iter()
            .map(|t| (t, windows.clone()))
            .collect();
        self.crossing_windows = Some(per_tetrode);
        self
    }

    /// Mark the recording as unit-mode with per-tetrode crossing windows
    pub fn with_tetrode_windows(mut self, windows: BTreeMap<usize, Vec<(u64, u64)>>) -> Self {
        self.crossing_windows = Some(windows);
        self
    }
}

impl Recording for InMemoryRecording {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_samples(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    fn read(&self, channel: usize, start: u64, len: usize) -> Vec<i16> {
        let mut out = vec![0i16; len];
        if let Some(data) = self.channels.get(channel) {
            let start = start as usize;
            if start < data.len() {
                let end = (start + len).min(data.len());
                out[..end - start].copy_from_slice(&data[start..end]);
            }
        }
        out
    }

    fn crossing_windows(&self, tetrode: usize) -> Option<Vec<(u64, u64)>> {
        self.crossing_windows
            .as_ref()
            .map(|w| w.get(&tetrode).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct UnitEntry {
    tetrode: usize,
    spikes: Vec<u64>,
    waveforms: Option<Vec<Snippet>>,
}

/// Sorting result held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySorting {
    units: BTreeMap<u32, UnitEntry>,
}

impl InMemorySorting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit; spike samples are sorted on insertion
    pub fn add_unit(&mut self, unit_id: u32, tetrode: usize, mut spikes: Vec<u64>) {
        spikes.sort_unstable();
        self.units.insert(
            unit_id,
            UnitEntry {
                tetrode,
                spikes,
                waveforms: None,
            },
        );
    }

    /// Add a unit with precomputed snippets, one per spike in the given order
    pub fn add_unit_with_waveforms(
        &mut self,
        unit_id: u32,
        tetrode: usize,
        spikes: Vec<u64>,
        waveforms: Vec<Snippet>,
    ) {
        assert_eq!(
            spikes.len(),
            waveforms.len(),
            "One waveform per spike is required"
        );
        let mut paired: Vec<(u64, Snippet)> = spikes.into_iter().zip(waveforms).collect();
        paired.sort_by_key(|(t, _)| *t);
        let (spikes, waveforms) = paired.into_iter().unzip();
        self.units.insert(
            unit_id,
            UnitEntry {
                tetrode,
                spikes,
                waveforms: Some(waveforms),
            },
        );
    }
}

impl Sorting for InMemorySorting {
    fn unit_ids(&self) -> Vec<u32> {
        self.units.keys().copied().collect()
    }

    fn unit_tetrode(&self, unit_id: u32) -> usize {
        self.units.get(&unit_id).map_or(0, |u| u.tetrode)
    }

    fn spike_train(&self, unit_id: u32) -> Vec<u64> {
        self.units
            .get(&unit_id)
            .map(|u| u.spikes.clone())
            .unwrap_or_default()
    }

    fn spike_waveforms(&self, unit_id: u32) -> Option<Vec<Snippet>> {
        self.units.get(&unit_id).and_then(|u| u.waveforms.clone())
    }
}
