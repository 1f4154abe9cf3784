//! Settings (`.set`) file
//!
//! Acquisition metadata of a trial. The writer never invents these values:
//! it copies a reference settings file and only rewrites the trial duration.

use std::io::{self, Write};
use std::path::Path;

use super::{
    decode_header, encode_header, header_number, header_value, parse_header_text, write_entry,
    HeaderEntries,
};
use crate::error::{Result, TintError};

/// Key holding the raw sample rate in Hz
pub const SAMPLE_RATE_KEY: &str = "rawRate";
/// Key holding the trial duration in whole seconds
pub const DURATION_KEY: &str = "duration";
/// Last key of the trial preamble copied into every data file header
pub const PREAMBLE_END_KEY: &str = "sw_version";

/// Parsed settings file, key order preserved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetFile {
    entries: HeaderEntries,
}

impl SetFile {
    pub fn parse(text: &str) -> Self {
        Self {
            entries: parse_header_text(text),
        }
    }

    /// Read a settings file; a missing file is reported as
    /// [`TintError::MissingReferenceFile`]
    pub fn read(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&decode_header(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TintError::MissingReferenceFile {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(TintError::io(path, e)),
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        header_value(&self.entries, key)
    }

    /// Replace the first value stored under `key`, appending it if absent
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        header_number(&self.entries, SAMPLE_RATE_KEY)
    }

    pub fn duration_secs(&self) -> Option<u64> {
        header_number(&self.entries, DURATION_KEY)
    }

    /// Samples kept before the trigger sample of each spike
    pub fn pretrig_samples(&self) -> Option<usize> {
        header_number(&self.entries, "pretrigSamps")
    }

    /// Samples kept from the trigger sample onwards
    pub fn spike_lockout(&self) -> Option<usize> {
        header_number(&self.entries, "spikeLockout")
    }

    /// Amplifier gain of a 0-based channel
    pub fn gain(&self, channel: usize) -> Option<u32> {
        header_number(&self.entries, &format!("gain_ch_{channel}"))
    }

    /// Trial preamble: entries up to and including `sw_version`
    ///
    /// Empty if the file has no `sw_version` line.
    pub fn preamble(&self) -> HeaderEntries {
        match self.entries.iter().position(|(k, _)| k == PREAMBLE_END_KEY) {
            Some(end) => self.entries[..=end].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (key, value) in &self.entries {
            if value.is_empty() {
                w.write_all(&encode_header(key))?;
                w.write_all(b"\r\n")?;
            } else {
                write_entry(w, key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "trial_date Tuesday, 4 May 2021\r\n\
                          trial_time 10:12:45\r\n\
                          experimenter lab\r\n\
                          comments \r\n\
                          duration 1201\r\n\
                          sw_version 1.2.2.16\r\n\
                          ADC_fullscale_mv 1500\r\n\
                          gain_ch_0 8000\r\n\
                          gain_ch_1 8000\r\n\
                          rawRate 48000\r\n\
                          pretrigSamps 10\r\n\
                          spikeLockout 40\r\n";

    #[test]
    fn test_acquisition_metadata() {
        let set = SetFile::parse(SAMPLE);
        assert_eq!(set.sample_rate(), Some(48000));
        assert_eq!(set.duration_secs(), Some(1201));
        assert_eq!(set.pretrig_samples(), Some(10));
        assert_eq!(set.spike_lockout(), Some(40));
        assert_eq!(set.gain(1), Some(8000));
        assert_eq!(set.gain(7), None);
    }

    #[test]
    fn test_preamble_ends_at_sw_version() {
        let set = SetFile::parse(SAMPLE);
        let preamble = set.preamble();
        assert_eq!(preamble.len(), 6);
        assert_eq!(preamble.last().unwrap().0, "sw_version");
        assert!(SetFile::parse("rawRate 48000\r\n").preamble().is_empty());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut set = SetFile::parse(SAMPLE);
        set.set("duration", "30");
        set.set("new_key", "1");
        assert_eq!(set.duration_secs(), Some(30));
        assert_eq!(set.entries()[4].0, "duration");
        assert_eq!(set.entries().last().unwrap().0, "new_key");
    }

    #[test]
    fn test_write_round_trip() {
        let set = SetFile::parse(SAMPLE);
        let mut out = Vec::new();
        set.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("comments\r\n"));
        assert_eq!(SetFile::parse(&text), set);
    }

    #[test]
    fn test_code_page_bytes_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trial.set");
        let bytes = b"experimenter M\xfcller\r\ncomments 20\xb5V\r\nsw_version 1.2.2.16\r\n";
        std::fs::write(&path, bytes).unwrap();

        let set = SetFile::read(&path).unwrap();
        assert_eq!(set.get("experimenter"), Some("M\u{fc}ller"));
        assert_eq!(set.get("comments"), Some("20\u{b5}V"));

        let mut out = Vec::new();
        set.write_to(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_missing_file() {
        let err = SetFile::read(Path::new("/nonexistent/dir/trial.set")).unwrap_err();
        assert!(matches!(err, TintError::MissingReferenceFile { .. }));
    }
}
