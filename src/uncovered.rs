//! Zero-coverage records for source files no process ever loaded.

use std::path::{Path, PathBuf};

use crate::exclude::ExcludeRuleset;
use crate::normalize::FileIndex;
use crate::snapshot::{
    CoverageRange, FunctionCoverage, ScriptCoverage, SourceMapCacheEntry, EMPTY_REPORT_FN,
};
use crate::source_map::{source_map_from_file, SourceMapCache};

/// Placeholder script for a file that was never executed: a single
/// `(empty-report)` function spanning the whole file with count 0.
#[must_use]
pub fn empty_report(path: &Path, size: u64) -> ScriptCoverage {
    ScriptCoverage {
        script_id: "0".to_string(),
        url: path.to_string_lossy().into_owned(),
        functions: vec![FunctionCoverage {
            function_name: EMPTY_REPORT_FN.to_string(),
            ranges: vec![CoverageRange::new(0, size, 0)],
            is_block_coverage: true,
        }],
    }
}

/// Walk every root and emit a placeholder for each matching file missing from
/// `index`. Source maps referenced by those files are registered in `cache`.
///
/// Roots that cannot be listed, and files that disappear before they can be
/// measured, are skipped.
pub fn include_uncovered_files(
    roots: &[PathBuf],
    ruleset: &ExcludeRuleset,
    index: &FileIndex,
    cache: &mut SourceMapCache,
) -> Vec<ScriptCoverage> {
    let mut reports = Vec::new();
    for root in roots {
        let files = match ruleset.glob_files(root) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("cannot list files under {}: {e}", root.display());
                continue;
            }
        };

        for rel in files {
            let full_path = root.join(rel);
            if index.contains(&full_path) {
                continue;
            }
            let size = match std::fs::metadata(&full_path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::debug!("skipping {}: {e}", full_path.display());
                    continue;
                }
            };
            if let Some(map) = source_map_from_file(&full_path) {
                cache.insert(
                    &full_path.to_string_lossy(),
                    SourceMapCacheEntry {
                        data: Some(map),
                        line_lengths: None,
                    },
                );
            }
            reports.push(empty_report(&full_path, size));
        }
    }
    reports
}
