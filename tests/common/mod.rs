#![allow(dead_code)]

use std::path::{Path, PathBuf};

use covmerge::config::ReportOptions;
use covmerge::snapshot::{CoverageRange, FunctionCoverage, RuntimeSnapshot, ScriptCoverage};
use tempfile::TempDir;

/// Create a fresh project directory with an empty snapshot directory.
/// The caller must hold onto `TempDir` to keep the directory alive.
pub fn setup_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("coverage/tmp")).unwrap();
    dir
}

/// Options rooted at `dir`, with every other value at its default.
pub fn options(dir: &Path) -> ReportOptions {
    ReportOptions {
        cwd: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

pub fn write_source(dir: &Path, rel: &str, content: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn write_snapshot(dir: &Path, name: &str, snapshot: &RuntimeSnapshot) {
    let path = dir.join("coverage/tmp").join(name);
    std::fs::write(path, serde_json::to_vec(snapshot).unwrap()).unwrap();
}

pub fn write_raw_snapshot(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join("coverage/tmp").join(name), body).unwrap();
}

pub fn function(name: &str, ranges: &[(u64, u64, u64)]) -> FunctionCoverage {
    FunctionCoverage {
        function_name: name.to_string(),
        ranges: ranges
            .iter()
            .map(|&(start, end, count)| CoverageRange::new(start, end, count))
            .collect(),
        is_block_coverage: ranges.len() > 1,
    }
}

pub fn script(url: &str, functions: Vec<FunctionCoverage>) -> ScriptCoverage {
    ScriptCoverage {
        script_id: "1".to_string(),
        url: url.to_string(),
        functions,
    }
}

/// Snapshot with a single script whose url is the `file://` form of `path`.
pub fn snapshot_for(path: &Path, functions: Vec<FunctionCoverage>) -> RuntimeSnapshot {
    RuntimeSnapshot::new(vec![script(
        &format!("file://{}", path.display()),
        functions,
    )])
}
