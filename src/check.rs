//! Threshold evaluation over a coverage map.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coverage_map::CoverageMap;
use crate::exclude::{relative_to, to_slash};
use crate::model::{CoverageSummary, Metric};

/// Minimum percentage required for each metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub lines: f64,
    pub functions: f64,
    pub branches: f64,
    pub statements: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lines: 90.0,
            functions: 0.0,
            branches: 0.0,
            statements: 0.0,
        }
    }
}

impl Thresholds {
    /// The same threshold for every metric.
    #[must_use]
    pub fn all(value: f64) -> Self {
        Self {
            lines: value,
            functions: value,
            branches: value,
            statements: value,
        }
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Lines => self.lines,
            Metric::Functions => self.functions,
            Metric::Branches => self.branches,
            Metric::Statements => self.statements,
        }
    }
}

/// One metric that fell below its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub metric: Metric,
    pub actual: f64,
    pub threshold: f64,
    /// Path relative to the working directory, for per-file checks.
    pub file: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Violation {
            metric,
            actual,
            threshold,
            file,
        } = self;
        match file {
            Some(file) => write!(
                f,
                "ERROR: Coverage for {metric} ({actual}%) does not meet threshold ({threshold}%) for {file}"
            ),
            None => write!(
                f,
                "ERROR: Coverage for {metric} ({actual}%) does not meet global threshold ({threshold}%)"
            ),
        }
    }
}

/// Result of a threshold check. Failing is not an error; callers decide what
/// to do with the violations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub violations: Vec<Violation>,
}

impl CheckOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check the map against `thresholds`, either as a whole or file by file.
/// Every metric is evaluated; all violations are collected.
#[must_use]
pub fn check_coverage(
    map: &CoverageMap,
    thresholds: &Thresholds,
    per_file: bool,
    cwd: &Path,
) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    if per_file {
        for file in map.iter() {
            let display = to_slash(&relative_to(Path::new(&file.path), cwd));
            check_summary(&file.summary(), thresholds, Some(&display), &mut outcome);
        }
    } else {
        check_summary(&map.summary(), thresholds, None, &mut outcome);
    }
    outcome
}

fn check_summary(
    summary: &CoverageSummary,
    thresholds: &Thresholds,
    file: Option<&str>,
    outcome: &mut CheckOutcome,
) {
    for metric in Metric::ALL {
        let actual = summary.get(metric).pct;
        let threshold = thresholds.get(metric);
        if actual < threshold {
            outcome.violations.push(Violation {
                metric,
                actual,
                threshold,
                file: file.map(str::to_string),
            });
        }
    }
}
