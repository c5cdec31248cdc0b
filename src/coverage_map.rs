use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{CoverageSummary, FileCoverage};

/// Converted coverage keyed by canonical path. Exactly one entry per path;
/// further contributions for a path are merged into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CoverageMap {
    files: BTreeMap<String, FileCoverage>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, or merge it into the existing entry for its path.
    pub fn merge_file(&mut self, file: FileCoverage) {
        match self.files.get_mut(&file.path) {
            Some(existing) => existing.merge(file),
            None => {
                self.files.insert(file.path.clone(), file);
            }
        }
    }

    /// Merge every file of another map into this one.
    pub fn merge(&mut self, other: CoverageMap) {
        for file in other.files.into_values() {
            self.merge_file(file);
        }
    }

    /// Paths in sorted order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileCoverage> {
        self.files.values()
    }

    #[must_use]
    pub fn file_coverage_for(&self, path: &str) -> Option<&FileCoverage> {
        self.files.get(path)
    }

    #[must_use]
    pub fn file_summary(&self, path: &str) -> Option<CoverageSummary> {
        self.files.get(path).map(FileCoverage::summary)
    }

    /// Summary over every file in the map.
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        let mut total = CoverageSummary::default();
        for file in self.files.values() {
            total.merge(&file.summary());
        }
        total
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
