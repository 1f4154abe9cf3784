//! Axona TINT file formats
//!
//! Every TINT file starts with CRLF-terminated `key value` text lines. Binary
//! files follow the header with the literal `data_start`, the payload and a
//! closing `\r\ndata_end\r\n`.
//!
//! - Settings file ([`set_file`])
//! - Tetrode spike file `<base>.<n>` ([`tetrode`])
//! - Unit labels `<base>_<n>.cut` / `<base>_<n>.clu` ([`cut`])
//! - Continuous tetrode waveform `<base>_<n>.cont` ([`continuous`])

pub mod continuous;
pub mod cut;
pub mod set_file;
pub mod tetrode;

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Marker separating the text header from binary data
pub const DATA_START: &[u8] = b"data_start";

/// Trailer written after binary data
pub const DATA_END: &[u8] = b"\r\ndata_end\r\n";

/// Ordered `key value` header entries; keys may repeat
pub type HeaderEntries = Vec<(String, String)>;

/// Decode header bytes one char per byte
///
/// DacqUSB writes headers in a Windows code page, not UTF-8. Mapping each byte
/// to the char of the same value keeps every byte, so [`encode_header`] gives
/// back the original bytes.
pub fn decode_header(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`decode_header`]; chars above U+00FF become `?`
pub fn encode_header(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Parse header text into ordered entries
///
/// Each non-empty line splits at its first space into key and value.
pub fn parse_header_text(text: &str) -> HeaderEntries {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((key, value)) => (key.to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// First value stored under `key`
pub fn header_value<'a>(entries: &'a [(String, String)], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Leading integer of a header value such as `48000 hz`
pub fn header_number<T: std::str::FromStr>(entries: &[(String, String)], key: &str) -> Option<T> {
    header_value(entries, key)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Write one `key value` header line
pub fn write_entry<W: Write>(w: &mut W, key: &str, value: impl std::fmt::Display) -> io::Result<()> {
    w.write_all(&encode_header(&format!("{key} {value}\r\n")))
}

/// Split a complete file into header entries and the bytes after `data_start`
pub fn split_header(bytes: &[u8]) -> Option<(HeaderEntries, &[u8])> {
    let pos = find_marker(bytes, DATA_START)?;
    let text = decode_header(&bytes[..pos]);
    Some((parse_header_text(&text), &bytes[pos + DATA_START.len()..]))
}

/// Read a file's header without loading its binary payload
///
/// Returns the entries and the byte offset where the payload starts.
pub fn read_header_only(path: &Path) -> io::Result<Option<(HeaderEntries, u64)>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let searched_from = buf.len().saturating_sub(DATA_START.len());
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_marker(&buf[searched_from..], DATA_START) {
            let pos = searched_from + pos;
            let text = decode_header(&buf[..pos]);
            return Ok(Some((
                parse_header_text(&text),
                (pos + DATA_START.len()) as u64,
            )));
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
}

/// Dataset base path: the settings file path without its extension
pub fn base_path(set_path: &Path) -> PathBuf {
    set_path.with_extension("")
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<base>.<tetrode>`
pub fn tetrode_path(base: &Path, tetrode: usize) -> PathBuf {
    with_suffix(base, &format!(".{tetrode}"))
}

/// `<base>_<tetrode>.cut`
pub fn cut_path(base: &Path, tetrode: usize) -> PathBuf {
    with_suffix(base, &format!("_{tetrode}.cut"))
}

/// `<base>_<tetrode>.clu`
pub fn clu_path(base: &Path, tetrode: usize) -> PathBuf {
    with_suffix(base, &format!("_{tetrode}.clu"))
}

/// `<base>_<tetrode>.cont`
pub fn continuous_path(base: &Path, tetrode: usize) -> PathBuf {
    with_suffix(base, &format!("_{tetrode}.cont"))
}

/// Tetrode numbers that have a spike file next to `set_path`, ascending
pub fn discover_tetrodes(set_path: &Path) -> io::Result<Vec<usize>> {
    let base = base_path(set_path);
    let stem = match base.file_name() {
        Some(s) => s.to_string_lossy().into_owned(),
        None => return Ok(Vec::new()),
    };
    let dir = match set_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let prefix = format!("{stem}.");
    let mut tetrodes: Vec<usize> = std::fs::read_dir(&dir)?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_prefix(&prefix)?.parse::<usize>().ok()
        })
        .filter(|&t| t > 0)
        .collect();
    tetrodes.sort_unstable();
    tetrodes.dedup();
    Ok(tetrodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_text() {
        let text = "trial_date Tuesday, 4 May 2021\r\nrawRate 48000\r\n\r\nflag\r\n";
        let entries = parse_header_text(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(header_value(&entries, "trial_date"), Some("Tuesday, 4 May 2021"));
        assert_eq!(header_number::<u32>(&entries, "rawRate"), Some(48000));
        assert_eq!(header_value(&entries, "flag"), Some(""));
    }

    #[test]
    fn test_header_number_with_unit() {
        let entries = vec![("sample_rate".to_string(), "48000 hz".to_string())];
        assert_eq!(header_number::<u32>(&entries, "sample_rate"), Some(48000));
        assert_eq!(header_number::<u32>(&entries, "missing"), None);
    }

    #[test]
    fn test_split_header() {
        let mut bytes = b"num_spikes 0\r\ndata_start".to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        let (entries, payload) = split_header(&bytes).unwrap();
        assert_eq!(header_value(&entries, "num_spikes"), Some("0"));
        assert_eq!(payload, &[1, 2, 3]);
        assert!(split_header(b"no marker here").is_none());
    }

    #[test]
    fn test_header_bytes_are_kept() {
        let mut bytes = b"comments 20\xb5V \x80\r\ndata_start".to_vec();
        bytes.push(0);
        let (entries, _) = split_header(&bytes).unwrap();
        let value = header_value(&entries, "comments").unwrap();
        assert_eq!(value, "20\u{b5}V \u{80}");

        let mut out = Vec::new();
        write_entry(&mut out, "comments", value).unwrap();
        assert_eq!(out, b"comments 20\xb5V \x80\r\n");
        assert_eq!(encode_header("\u{2603}"), b"?");
    }

    #[test]
    fn test_paths() {
        let base = base_path(Path::new("/data/session.v2/rat1.set"));
        assert_eq!(base, PathBuf::from("/data/session.v2/rat1"));
        assert_eq!(tetrode_path(&base, 3), PathBuf::from("/data/session.v2/rat1.3"));
        assert_eq!(cut_path(&base, 3), PathBuf::from("/data/session.v2/rat1_3.cut"));
        assert_eq!(clu_path(&base, 3), PathBuf::from("/data/session.v2/rat1_3.clu"));
        assert_eq!(
            continuous_path(&base, 3),
            PathBuf::from("/data/session.v2/rat1_3.cont")
        );
    }
}
