//! Export and comparison settings
//!
//! Stored as JSON; every field has a default so partial files are valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TintError};
use crate::format::tetrode::DEFAULT_TIMEBASE_HZ;

fn default_timebase() -> u32 {
    DEFAULT_TIMEBASE_HZ
}

fn default_parallel() -> bool {
    true
}

fn default_pretrig() -> usize {
    10
}

fn default_lockout() -> usize {
    40
}

fn default_tolerance() -> u64 {
    50
}

/// Writer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Seed of the noise generator used by [`crate::writer::TintWriter::write`]
    #[serde(default)]
    pub seed: u64,
    /// Clock of spike file timestamps in Hz
    #[serde(default = "default_timebase")]
    pub timebase_hz: u32,
    /// Write tetrodes on separate threads
    #[serde(default = "default_parallel")]
    pub parallel_tetrodes: bool,
    /// Pre-trigger samples when the reference file has no `pretrigSamps`
    #[serde(default = "default_pretrig")]
    pub default_pretrig_samples: usize,
    /// Post-trigger samples when the reference file has no `spikeLockout`
    #[serde(default = "default_lockout")]
    pub default_lockout_samples: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            timebase_hz: default_timebase(),
            parallel_tetrodes: default_parallel(),
            default_pretrig_samples: default_pretrig(),
            default_lockout_samples: default_lockout(),
        }
    }
}

/// Which spikes are matched against each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScope {
    /// Spikes of the same unit label on the same tetrode
    #[default]
    Unit,
    /// All spikes of a tetrode, whatever their unit
    Tetrode,
}

/// Comparator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Largest offset in samples still counted as a match
    #[serde(default = "default_tolerance")]
    pub tolerance_samples: u64,
    #[serde(default)]
    pub scope: MatchScope,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            tolerance_samples: default_tolerance(),
            scope: MatchScope::default(),
        }
    }
}

/// Complete settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub compare: CompareConfig,
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TintError::io(path, e))?;
        let settings = serde_json::from_str(&contents)
            .map_err(|e| TintError::format(path, format!("invalid settings: {e}")))?;
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Save settings as pretty JSON, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TintError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TintError::format(path, format!("cannot encode settings: {e}")))?;
        std::fs::write(path, json).map_err(|e| TintError::io(path, e))?;
        tracing::info!(path = %path.display(), "Settings saved");
        Ok(())
    }
}
