//! Error types shared by the writer, the dataset reader and the comparator

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building epochs, writing or reading TINT datasets
#[derive(Debug, Error)]
pub enum TintError {
    #[error("Invalid epoch input: {0}")]
    InvalidEpoch(String),

    #[error("Reference settings file not found: {}", path.display())]
    MissingReferenceFile { path: PathBuf },

    #[error(
        "Sample rate mismatch: recording is {recording} Hz, reference {} says {reference} Hz",
        path.display()
    )]
    IncompatibleSamplingRate {
        recording: u32,
        reference: u32,
        path: PathBuf,
    },

    #[error(
        "Unit {unit_id} on tetrode {tetrode} has a spike at sample {sample}, \
         beyond the recording's {total_samples} samples"
    )]
    UnitOutOfRange {
        unit_id: u32,
        tetrode: usize,
        sample: u64,
        total_samples: u64,
    },

    #[error("Unit {unit_id} is sorted on tetrode {tetrode}, which the recording does not have")]
    UnknownTetrode { unit_id: u32, tetrode: usize },

    #[error("Datasets disagree on {field}: original {original}, exported {exported}")]
    DatasetMismatch {
        field: &'static str,
        original: String,
        exported: String,
    },

    #[error("Malformed TINT file {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("Refusing to write {}: {reason}", path.display())]
    InvalidOutput { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TintError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias used throughout the core crate
pub type Result<T> = std::result::Result<T, TintError>;
