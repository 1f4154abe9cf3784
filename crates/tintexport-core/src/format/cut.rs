//! Unit label files (`.cut` and `.clu`)
//!
//! Both list one 1-based unit label per spike of the matching tetrode file,
//! in spike order. The `.cut` layout follows the gebaSpike exporter so TINT
//! can load it directly.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Result, TintError};

const LABELS_PER_ROW: usize = 25;
const ZERO_COLUMN: &str = "    0";

fn distinct(labels: &[u32]) -> usize {
    labels.iter().collect::<BTreeSet<_>>().len()
}

/// Write a `.cut` file; `basename` names the cut in its `Exact_cut_for` line
pub fn write_cut<W: Write>(w: &mut W, basename: &str, labels: &[u32]) -> io::Result<()> {
    let n_clusters = distinct(labels);
    let zero_line = ZERO_COLUMN.repeat(8);
    let spaces = " ".repeat(15);

    writeln!(w, "n_clusters: {n_clusters}")?;
    writeln!(w, "n_channels: 4")?;
    writeln!(w, "n_params: 2")?;
    writeln!(w, "times_used_in_Vt:{}", ZERO_COLUMN.repeat(4))?;
    for cluster in 0..n_clusters {
        writeln!(w, " cluster: {cluster} center:{zero_line}")?;
        writeln!(w, "{spaces}min:{zero_line}")?;
        writeln!(w, "{spaces}max:{zero_line}")?;
    }
    writeln!(w, "\nExact_cut_for: {basename} spikes: {}", labels.len())?;

    for (i, row) in labels.chunks(LABELS_PER_ROW).enumerate() {
        if i > 0 {
            w.write_all(b"\n")?;
        }
        for label in row {
            write!(w, "{label:>3}")?;
        }
    }
    Ok(())
}

/// Write a `.clu` file: cluster count, then one label per line
pub fn write_clu<W: Write>(w: &mut W, labels: &[u32]) -> io::Result<()> {
    writeln!(w, "{}", distinct(labels))?;
    for label in labels {
        writeln!(w, "{label}")?;
    }
    Ok(())
}

fn parse_labels(path: &Path, text: &str) -> Result<Vec<u32>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse()
                .map_err(|_| TintError::format(path, format!("invalid unit label '{tok}'")))
        })
        .collect()
}

/// Read the labels of a `.cut` file
pub fn read_cut(path: &Path) -> Result<Vec<u32>> {
    let text = std::fs::read_to_string(path).map_err(|e| TintError::io(path, e))?;
    let (_, rest) = text
        .split_once("Exact_cut_for:")
        .ok_or_else(|| TintError::format(path, "no Exact_cut_for line"))?;
    let (header_line, body) = rest.split_once('\n').unwrap_or((rest, ""));

    let expected: Option<usize> = header_line
        .split_once("spikes:")
        .and_then(|(_, n)| n.trim().parse().ok());
    let labels = parse_labels(path, body)?;
    if let Some(expected) = expected {
        if expected != labels.len() {
            return Err(TintError::format(
                path,
                format!("header announces {expected} spikes, found {} labels", labels.len()),
            ));
        }
    }
    Ok(labels)
}

/// Read the labels of a `.clu` file (the leading cluster count is dropped)
pub fn read_clu(path: &Path) -> Result<Vec<u32>> {
    let text = std::fs::read_to_string(path).map_err(|e| TintError::io(path, e))?;
    let mut values = parse_labels(path, &text)?;
    if values.is_empty() {
        return Err(TintError::format(path, "empty clu file"));
    }
    values.remove(0);
    Ok(values)
}
