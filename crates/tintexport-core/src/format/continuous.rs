//! Continuous tetrode waveform file (`<base>_<n>.cont`)
//!
//! ## Layout
//!
//! Text header (trial preamble, channel count, sample rate, sample count and
//! the epoch table as `epoch <start> <length> <kind>` lines), then
//! `data_start` and interleaved little-endian 16-bit frames:
//!
//! ```text
//! [i16_le ch1][i16_le ch2]...[i16_le chN]   one frame per sample
//! ```

use std::io::{self, Write};
use std::path::Path;

use super::{header_number, read_header_only, split_header, write_entry, HeaderEntries, DATA_END};
use crate::epoch::{Epoch, EpochKind};
use crate::error::{Result, TintError};

const BYTES_PER_SAMPLE: usize = 2;

/// Header of a continuous waveform file
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousHeader {
    pub num_chans: usize,
    pub sample_rate: u32,
    pub num_samples: u64,
    pub epochs: Vec<Epoch>,
}

impl ContinuousHeader {
    /// Payload size in bytes, excluding the trailer
    pub fn payload_len(&self) -> u64 {
        self.num_samples * (self.num_chans * BYTES_PER_SAMPLE) as u64
    }
}

/// Write the text header up to and including `data_start`
pub fn write_header<W: Write>(
    w: &mut W,
    preamble: &[(String, String)],
    header: &ContinuousHeader,
) -> io::Result<()> {
    for (key, value) in preamble {
        write_entry(w, key, value)?;
    }
    write_entry(w, "num_chans", header.num_chans)?;
    write_entry(w, "sample_rate", format!("{} hz", header.sample_rate))?;
    write_entry(w, "bytes_per_sample", BYTES_PER_SAMPLE)?;
    write_entry(w, "num_samples", header.num_samples)?;
    write_entry(w, "num_epochs", header.epochs.len())?;
    for epoch in &header.epochs {
        write_entry(
            w,
            "epoch",
            format_args!("{} {} {}", epoch.start_sample, epoch.length_samples, epoch.kind),
        )?;
    }
    w.write_all(super::DATA_START)
}

/// Append interleaved frames for a block of per-channel samples
///
/// All channel slices must have the same length.
pub fn write_frames<W: Write>(w: &mut W, channels: &[Vec<i16>]) -> io::Result<()> {
    let len = channels.first().map_or(0, Vec::len);
    let mut frame = Vec::with_capacity(channels.len() * BYTES_PER_SAMPLE);
    for i in 0..len {
        frame.clear();
        for channel in channels {
            frame.extend_from_slice(&channel[i].to_le_bytes());
        }
        w.write_all(&frame)?;
    }
    Ok(())
}

/// Close the payload
pub fn write_trailer<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(DATA_END)
}

fn parse_header(path: &Path, entries: &HeaderEntries) -> Result<ContinuousHeader> {
    let require = |key: &str| -> Result<u64> {
        header_number(entries, key)
            .ok_or_else(|| TintError::format(path, format!("missing or invalid '{key}'")))
    };
    let num_chans = require("num_chans")? as usize;
    let sample_rate = require("sample_rate")? as u32;
    let num_samples = require("num_samples")?;
    let num_epochs = require("num_epochs")? as usize;

    let epochs = entries
        .iter()
        .filter(|(k, _)| k == "epoch")
        .map(|(_, value)| {
            let fields: Vec<&str> = value.split_whitespace().collect();
            let parsed = match fields.as_slice() {
                [start, length, kind] => start
                    .parse()
                    .ok()
                    .zip(length.parse().ok())
                    .zip(kind.parse::<EpochKind>().ok()),
                _ => None,
            };
            parsed
                .map(|((start, length), kind)| Epoch::new(start, length, kind))
                .ok_or_else(|| TintError::format(path, format!("invalid epoch line '{value}'")))
        })
        .collect::<Result<Vec<_>>>()?;

    if epochs.len() != num_epochs {
        return Err(TintError::format(
            path,
            format!("header announces {num_epochs} epochs, found {}", epochs.len()),
        ));
    }

    Ok(ContinuousHeader {
        num_chans,
        sample_rate,
        num_samples,
        epochs,
    })
}

/// Read only the header and check the payload is complete
pub fn read_continuous_header(path: &Path) -> Result<ContinuousHeader> {
    let (entries, offset) = read_header_only(path)
        .map_err(|e| TintError::io(path, e))?
        .ok_or_else(|| TintError::format(path, "no data_start marker"))?;
    let header = parse_header(path, &entries)?;

    let file_len = std::fs::metadata(path)
        .map_err(|e| TintError::io(path, e))?
        .len();
    if file_len < offset + header.payload_len() {
        return Err(TintError::format(
            path,
            format!(
                "truncated: expected {} payload bytes, found {}",
                header.payload_len(),
                file_len.saturating_sub(offset)
            ),
        ));
    }
    Ok(header)
}

/// Read header and all samples, one vector per channel
pub fn read_continuous(path: &Path) -> Result<(ContinuousHeader, Vec<Vec<i16>>)> {
    let bytes = std::fs::read(path).map_err(|e| TintError::io(path, e))?;
    let (entries, payload) =
        split_header(&bytes).ok_or_else(|| TintError::format(path, "no data_start marker"))?;
    let header = parse_header(path, &entries)?;

    let expected = header.payload_len() as usize;
    if payload.len() < expected {
        return Err(TintError::format(
            path,
            format!("truncated: expected {expected} payload bytes, found {}", payload.len()),
        ));
    }

    let mut channels = vec![Vec::with_capacity(header.num_samples as usize); header.num_chans];
    if header.num_chans > 0 {
        for frame in payload[..expected].chunks_exact(header.num_chans * BYTES_PER_SAMPLE) {
            for (channel, bytes) in channels.iter_mut().zip(frame.chunks_exact(BYTES_PER_SAMPLE)) {
                channel.push(i16::from_le_bytes([bytes[0], bytes[1]]));
            }
        }
    }
    Ok((header, channels))
}
