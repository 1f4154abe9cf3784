//! Tetrode spike file (`<base>.<n>`)
//!
//! ## Layout
//!
//! Text header (trial preamble followed by the spike layout keys), then
//! `data_start` and one record per spike and channel:
//!
//! ```text
//! [u32_be timestamp][i8 sample; samples_per_spike]
//! ```
//!
//! Timestamps count ticks of `timebase` (96 kHz), not samples. Samples are
//! stored as the high byte of the 16-bit value.

use std::io::{self, Write};
use std::path::Path;

use super::{header_number, split_header, write_entry, DATA_END};
use crate::error::{Result, TintError};
use crate::source::Snippet;

/// Default timestamp clock of DacqUSB spike files
pub const DEFAULT_TIMEBASE_HZ: u32 = 96000;

const BYTES_PER_TIMESTAMP: usize = 4;

/// One spike: trigger sample and snippet (`channels x samples_per_spike`)
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeRecord {
    pub timestamp: u64,
    pub waveform: Snippet,
}

/// Sample index to timebase ticks, rounded to the nearest tick
pub fn sample_to_ticks(sample: u64, sample_rate: u32, timebase: u32) -> u64 {
    let rate = sample_rate as u128;
    ((sample as u128 * timebase as u128 + rate / 2) / rate) as u64
}

/// Timebase ticks to sample index, rounded to the nearest sample
pub fn ticks_to_sample(ticks: u64, sample_rate: u32, timebase: u32) -> u64 {
    let tb = timebase as u128;
    ((ticks as u128 * sample_rate as u128 + tb / 2) / tb) as u64
}

/// 16-bit sample to the stored byte
pub fn to_stored(sample: i16) -> i8 {
    (sample >> 8) as i8
}

/// Stored byte back to a 16-bit sample
pub fn from_stored(byte: i8) -> i16 {
    (byte as i16) << 8
}

/// Layout parameters of a spike file
#[derive(Debug, Clone, PartialEq)]
pub struct TetrodeLayout {
    pub num_chans: usize,
    pub sample_rate: u32,
    pub timebase: u32,
    pub samples_per_spike: usize,
}

/// Write a complete spike file
///
/// Spikes must already be in timestamp order and every waveform must have
/// `num_chans` channels of `samples_per_spike` samples.
pub fn write_tetrode<W: Write>(
    w: &mut W,
    preamble: &[(String, String)],
    layout: &TetrodeLayout,
    spikes: &[SpikeRecord],
) -> io::Result<()> {
    for (key, value) in preamble {
        write_entry(w, key, value)?;
    }
    let spike_format: Vec<String> = (1..=layout.num_chans).map(|c| format!("t,ch{c}")).collect();
    write_entry(w, "num_chans", layout.num_chans)?;
    write_entry(w, "timebase", format!("{} hz", layout.timebase))?;
    write_entry(w, "bytes_per_timestamp", BYTES_PER_TIMESTAMP)?;
    write_entry(w, "samples_per_spike", layout.samples_per_spike)?;
    write_entry(w, "sample_rate", format!("{} hz", layout.sample_rate))?;
    write_entry(w, "bytes_per_sample", 1)?;
    write_entry(w, "spike_format", spike_format.join(","))?;
    write_entry(w, "num_spikes", spikes.len())?;
    w.write_all(super::DATA_START)?;

    let mut bytes = vec![0u8; layout.samples_per_spike];
    for spike in spikes {
        let ticks = sample_to_ticks(spike.timestamp, layout.sample_rate, layout.timebase);
        let ticks = u32::try_from(ticks).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("spike at sample {} overflows the timestamp field", spike.timestamp),
            )
        })?;
        for ch in 0..layout.num_chans {
            w.write_all(&ticks.to_be_bytes())?;
            let channel = spike.waveform.get(ch).map(Vec::as_slice).unwrap_or(&[]);
            for (i, byte) in bytes.iter_mut().enumerate() {
                *byte = to_stored(channel.get(i).copied().unwrap_or(0)) as u8;
            }
            w.write_all(&bytes)?;
        }
    }

    w.write_all(DATA_END)
}

/// Parsed spike file
#[derive(Debug, Clone)]
pub struct TetrodeFile {
    pub layout: TetrodeLayout,
    pub duration_secs: Option<u64>,
    /// Spikes with timestamps converted back to samples
    pub spikes: Vec<SpikeRecord>,
}

/// Read a spike file written by [`write_tetrode`] or by DacqUSB
pub fn read_tetrode(path: &Path) -> Result<TetrodeFile> {
    let bytes = std::fs::read(path).map_err(|e| TintError::io(path, e))?;
    let (header, payload) =
        split_header(&bytes).ok_or_else(|| TintError::format(path, "no data_start marker"))?;

    let require = |key: &str| -> Result<usize> {
        header_number(&header, key)
            .ok_or_else(|| TintError::format(path, format!("missing or invalid '{key}'")))
    };
    let num_chans = require("num_chans")?;
    let samples_per_spike = require("samples_per_spike")?;
    let num_spikes = require("num_spikes")?;
    let timebase = header_number(&header, "timebase").unwrap_or(DEFAULT_TIMEBASE_HZ);
    let sample_rate = header_number(&header, "sample_rate")
        .ok_or_else(|| TintError::format(path, "missing or invalid 'sample_rate'"))?;
    let bytes_per_sample: usize = header_number(&header, "bytes_per_sample").unwrap_or(1);
    let bytes_per_timestamp: usize =
        header_number(&header, "bytes_per_timestamp").unwrap_or(BYTES_PER_TIMESTAMP);
    if bytes_per_sample != 1 || bytes_per_timestamp != BYTES_PER_TIMESTAMP {
        return Err(TintError::format(
            path,
            format!(
                "unsupported layout: {bytes_per_timestamp} bytes per timestamp, \
                 {bytes_per_sample} bytes per sample"
            ),
        ));
    }
    if sample_rate == 0 || timebase == 0 {
        return Err(TintError::format(path, "zero sample rate or timebase"));
    }
    if num_chans == 0 {
        return Err(TintError::format(path, "num_chans is zero"));
    }

    let record_len = BYTES_PER_TIMESTAMP + samples_per_spike;
    let expected = num_spikes
        .checked_mul(num_chans)
        .and_then(|n| n.checked_mul(record_len))
        .ok_or_else(|| {
            TintError::format(path, format!("{num_spikes} spikes overflow the file size"))
        })?;
    if payload.len() < expected {
        return Err(TintError::format(
            path,
            format!(
                "truncated: {num_spikes} spikes need {expected} bytes, found {}",
                payload.len()
            ),
        ));
    }

    let spikes = payload[..expected]
        .chunks_exact(num_chans * record_len)
        .map(|spike| {
            let ticks = u32::from_be_bytes([spike[0], spike[1], spike[2], spike[3]]);
            let waveform = spike
                .chunks_exact(record_len)
                .map(|record| {
                    record[BYTES_PER_TIMESTAMP..]
                        .iter()
                        .map(|&b| from_stored(b as i8))
                        .collect()
                })
                .collect();
            SpikeRecord {
                timestamp: ticks_to_sample(ticks as u64, sample_rate, timebase),
                waveform,
            }
        })
        .collect();

    Ok(TetrodeFile {
        layout: TetrodeLayout {
            num_chans,
            sample_rate,
            timebase,
            samples_per_spike,
        },
        duration_secs: header_number(&header, "duration"),
        spikes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TetrodeLayout {
        TetrodeLayout {
            num_chans: 4,
            sample_rate: 48000,
            timebase: DEFAULT_TIMEBASE_HZ,
            samples_per_spike: 50,
        }
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(sample_to_ticks(1000, 48000, 96000), 2000);
        assert_eq!(ticks_to_sample(2000, 48000, 96000), 1000);
        // Non-integer ratio still recovers the sample
        for sample in [0u64, 1, 7, 12345, 999_999] {
            let ticks = sample_to_ticks(sample, 30000, 96000);
            assert_eq!(ticks_to_sample(ticks, 30000, 96000), sample);
        }
    }

    #[test]
    fn test_sample_byte_conversion() {
        assert_eq!(to_stored(0x1234), 0x12);
        assert_eq!(to_stored(-256), -1);
        assert_eq!(from_stored(0x12), 0x1200);
        assert_eq!(to_stored(from_stored(-77)), -77);
    }

    #[test]
    fn test_record_layout() {
        let spike = SpikeRecord {
            timestamp: 5,
            waveform: vec![vec![0x0100; 50], vec![0x0200; 50], vec![0; 50], vec![-256; 50]],
        };
        let mut out = Vec::new();
        write_tetrode(&mut out, &[], &layout(), &[spike]).unwrap();

        let (header, payload) = split_header(&out).unwrap();
        assert_eq!(header_number::<usize>(&header, "num_spikes"), Some(1));
        assert_eq!(payload.len(), 4 * 54 + DATA_END.len());
        // Ticks of sample 5 at 48 kHz on a 96 kHz clock, big-endian
        assert_eq!(&payload[..4], &[0, 0, 0, 10]);
        assert_eq!(payload[4], 1);
        assert_eq!(&payload[54..58], &[0, 0, 0, 10]);
        assert_eq!(payload[58], 2);
        assert_eq!(payload[3 * 54 + 4], 0xff);
        assert!(payload.ends_with(DATA_END));
    }

    #[test]
    fn test_header_spike_format() {
        let mut out = Vec::new();
        write_tetrode(&mut out, &[], &layout(), &[]).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("spike_format t,ch1,t,ch2,t,ch3,t,ch4\r\n"));
        assert!(text.contains("timebase 96000 hz\r\n"));
    }

    fn header_with(text_from: &str, text_to: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_tetrode(&mut out, &[], &layout(), &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(text_from));
        text.replace(text_from, text_to).into_bytes()
    }

    #[test]
    fn test_read_rejects_zero_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.1");
        let text = String::from_utf8(header_with("num_chans 4", "num_chans 0")).unwrap();
        let bytes = text.replace("num_spikes 0", "num_spikes 3").into_bytes();
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(read_tetrode(&path), Err(TintError::Format { .. })));
    }

    #[test]
    fn test_read_rejects_overflowing_spike_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.2");
        let bytes = header_with("num_spikes 0", &format!("num_spikes {}", usize::MAX));
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(read_tetrode(&path), Err(TintError::Format { .. })));
    }
}
