use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{CovmergeError, Result};
use crate::snapshot::RuntimeSnapshot;

/// Reads per-process coverage dumps from the temp directory.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Regular files in the directory, sorted by name.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CovmergeError::io(&self.dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CovmergeError::io(&self.dir, e))?;
            match entry.file_type() {
                Ok(ft) if ft.is_file() => files.push(entry.path()),
                Ok(_) => {}
                Err(e) => tracing::debug!("skipping {}: {e}", entry.path().display()),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read and parse one dump. Returns `Ok(None)` when the file is valid JSON
    /// but not a coverage dump.
    pub fn read_snapshot(&self, path: &Path) -> Result<Option<RuntimeSnapshot>> {
        let content = std::fs::read(path).map_err(|e| CovmergeError::io(path, e))?;
        parse_snapshot(&content)
    }

    /// Load every parseable dump. Files that fail to read or parse are logged
    /// and skipped.
    pub fn load_all(&self) -> Result<Vec<RuntimeSnapshot>> {
        let mut snapshots = Vec::new();
        for file in self.list_files()? {
            match self.read_snapshot(&file) {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {
                    tracing::warn!("skipping {}: not a coverage snapshot", file.display());
                }
                Err(e) => tracing::warn!("skipping {}: {e}", file.display()),
            }
        }
        Ok(snapshots)
    }
}

/// Parse a dump from raw bytes.
pub fn parse_snapshot(content: &[u8]) -> Result<Option<RuntimeSnapshot>> {
    let value: Value = serde_json::from_slice(content)?;
    if !RuntimeSnapshot::is_coverage_object(&value) {
        return Ok(None);
    }
    let snapshot = serde_json::from_value(value)?;
    Ok(Some(snapshot))
}
