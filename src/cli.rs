//! Command handler functions for the covmerge CLI.
//!
//! Each `cmd_*` function returns its output instead of printing it, making
//! them easy to test without capturing stdout.

use std::fmt::Write;

use anyhow::{Context, Result};

use crate::check::{check_coverage, CheckOutcome};
use crate::config::ReportOptions;
use crate::engine::CoverageEngine;
use crate::report::Reporter;

/// What a command produced: text for stdout, and the threshold check when
/// one was run.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub outcome: Option<CheckOutcome>,
}

impl CommandOutput {
    /// False only when a threshold check ran and recorded violations.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.as_ref().map_or(true, CheckOutcome::passed)
    }

    /// Violation messages, one per line.
    #[must_use]
    pub fn stderr(&self) -> String {
        let mut out = String::new();
        if let Some(outcome) = &self.outcome {
            for violation in &outcome.violations {
                writeln!(out, "{violation}").unwrap();
            }
        }
        out
    }
}

/// Build the coverage map and run every configured reporter. File-based
/// reporters write into the reports directory; the rest go to stdout.
pub fn cmd_report(options: ReportOptions) -> Result<CommandOutput> {
    let reporters = options
        .reporter
        .iter()
        .map(|name| name.parse::<Reporter>())
        .collect::<Result<Vec<_>, _>>()?;
    let reports_dir = options.reports_dir()?;
    let cwd = options.cwd()?;
    let check = options
        .check_coverage
        .then(|| (options.thresholds, options.per_file));
    let (skip_full, watermarks) = (options.skip_full, options.watermarks);

    let mut engine = CoverageEngine::new(options).context("Failed to set up the run")?;
    let map = engine.coverage_map()?;

    let mut stdout = String::new();
    for reporter in reporters {
        let formatter = reporter.formatter(&cwd, skip_full, watermarks);
        let output = formatter.format(map);
        match formatter.output_file() {
            Some(name) => {
                std::fs::create_dir_all(&reports_dir).with_context(|| {
                    format!("Failed to create {}", reports_dir.display())
                })?;
                let path = reports_dir.join(name);
                std::fs::write(&path, output)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::debug!("wrote {}", path.display());
            }
            None => stdout.push_str(&output),
        }
    }

    let outcome =
        check.map(|(thresholds, per_file)| check_coverage(map, &thresholds, per_file, &cwd));
    Ok(CommandOutput { stdout, outcome })
}

/// Build the coverage map and check it against the configured thresholds.
pub fn cmd_check_coverage(options: ReportOptions) -> Result<CommandOutput> {
    let cwd = options.cwd()?;
    let (thresholds, per_file) = (options.thresholds, options.per_file);
    let mut engine = CoverageEngine::new(options).context("Failed to set up the run")?;
    let map = engine.coverage_map()?;
    let outcome = check_coverage(map, &thresholds, per_file, &cwd);
    Ok(CommandOutput {
        stdout: String::new(),
        outcome: Some(outcome),
    })
}
