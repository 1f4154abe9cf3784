//! Tintexport Core - TINT format writer and timestamp comparator
//!
//! Converts a recording and its spike sorting into an Axona TINT dataset
//! (settings file, per-tetrode spike files, unit cuts and continuous
//! waveforms). Unit-mode recordings, which only hold samples around threshold
//! crossings, get their gaps filled with noise matching the recorded
//! background. A comparator reads two datasets back and reports how well
//! their spike timestamps line up.

pub mod compare;
pub mod config;
pub mod dataset;
pub mod epoch;
pub mod error;
pub mod format;
pub mod noise;
pub mod source;
pub mod writer;

use std::path::Path;

pub use compare::{Classification, Comparator, MismatchRecord, MismatchReport, TetrodeSummary};
pub use config::{CompareConfig, ExportConfig, MatchScope, Settings};
pub use dataset::{load_epoch_trace, EpochTrace, TintDataset};
pub use epoch::{build_epochs, Epoch, EpochKind};
pub use error::{Result, TintError};
pub use noise::{estimate_noise_model, synthesize, NoiseModel};
pub use source::{InMemoryRecording, InMemorySorting, Recording, Snippet, Sorting};
pub use writer::{ExportSummary, TetrodeExport, TintWriter};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Write a TINT dataset with default settings
pub fn write(
    recording: &dyn Recording,
    sorting: &dyn Sorting,
    output_set_path: &Path,
    reference_set_path: &Path,
) -> Result<ExportSummary> {
    TintWriter::default().write(recording, sorting, output_set_path, reference_set_path)
}

/// Compare two TINT datasets with default settings
pub fn compare(original_set_path: &Path, exported_set_path: &Path) -> Result<MismatchReport> {
    Comparator::default().compare(original_set_path, exported_set_path)
}
