//! Tintexport - export spike sorting results to Axona TINT
//!
//! This library re-exports the writer, dataset reader and comparator
//! from `tintexport-core`, together with the `write` and `compare`
//! convenience functions.

pub use tintexport_core::{compare, config, dataset, epoch, error, format, noise, source, writer};

pub use tintexport_core::{
    Classification, Comparator, CompareConfig, Epoch, EpochKind, EpochTrace, ExportConfig,
    ExportSummary, InMemoryRecording, InMemorySorting, MatchScope, MismatchReport, Recording,
    Result, Settings, Sorting, TintDataset, TintError, TintWriter, VERSION,
};

pub use tintexport_core::write;
