//! Output files staged next to their target and persisted on success
//!
//! A staged file lives under a hidden temporary name until
//! [`StagedFile::persist`] renames it into place. Dropping it on any error
//! path deletes the temporary, so an interrupted export never leaves a
//! half-written file under a TINT name.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, TintError};

const WRITE_BUFFER: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Create the temporary file in the target's directory
    pub(crate) fn create(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".tintexport-")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| TintError::io(dir, e))?;
        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    pub(crate) fn target(&self) -> &Path {
        &self.target
    }

    /// Run `f` against a buffered writer, then flush
    pub(crate) fn write_with<T>(
        &mut self,
        f: impl FnOnce(&mut BufWriter<&mut File>) -> Result<T>,
    ) -> Result<T> {
        let target = self.target.clone();
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, self.temp.as_file_mut());
        let out = f(&mut writer)?;
        writer.flush().map_err(|e| TintError::io(&target, e))?;
        Ok(out)
    }

    /// Sync and move the file to its final name
    pub(crate) fn persist(self) -> Result<PathBuf> {
        self.temp
            .as_file()
            .sync_all()
            .map_err(|e| TintError::io(&self.target, e))?;
        self.temp
            .persist(&self.target)
            .map_err(|e| TintError::io(&self.target, e.error))?;
        tracing::debug!(path = %self.target.display(), "file_persisted");
        Ok(self.target)
    }
}
