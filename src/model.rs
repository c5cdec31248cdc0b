//! File-level coverage produced by a converter: statements, branches and
//! functions with hit counts, plus the summaries computed from them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Percentage in the range 0–100, rounded to three decimals. An empty total
/// counts as fully covered.
#[must_use]
pub fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (100_000.0 * covered as f64 / total as f64 + 0.5).floor() / 1000.0
    }
}

/// The four metrics every summary carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Lines,
    Functions,
    Branches,
    Statements,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Lines,
        Metric::Functions,
        Metric::Branches,
        Metric::Statements,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Lines => "lines",
            Metric::Functions => "functions",
            Metric::Branches => "branches",
            Metric::Statements => "statements",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single statement. The line converter emits one per non-blank line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementCoverage {
    pub line_number: u32,
    pub hit_count: u64,
}

/// A single branch arm on a given line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchCoverage {
    pub line_number: u32,
    pub branch_index: u32,
    pub hit_count: u64,
}

/// A function and the number of times it was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEntry {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub hit_count: u64,
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileCoverage {
    pub path: String,
    pub statements: Vec<StatementCoverage>,
    pub branches: Vec<BranchCoverage>,
    pub functions: Vec<FunctionEntry>,
}

impl FileCoverage {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Fold another contribution for the same file into this one. Entries
    /// at the same location have their hit counts added; entries only one
    /// side knows about are kept as they are.
    pub fn merge(&mut self, other: FileCoverage) {
        if self.statements.len() != other.statements.len()
            || self.branches.len() != other.branches.len()
            || self.functions.len() != other.functions.len()
        {
            tracing::debug!(
                "merging {} with differing shapes: {}/{}/{} vs {}/{}/{} statements/branches/functions",
                self.path,
                self.statements.len(),
                self.branches.len(),
                self.functions.len(),
                other.statements.len(),
                other.branches.len(),
                other.functions.len(),
            );
        }

        merge_by_key(
            &mut self.statements,
            other.statements,
            |s| s.line_number,
            |a, b| a.hit_count += b.hit_count,
        );
        merge_by_key(
            &mut self.branches,
            other.branches,
            |b| (b.line_number, b.branch_index),
            |a, b| a.hit_count += b.hit_count,
        );
        merge_by_key(
            &mut self.functions,
            other.functions,
            |f| (f.name.clone(), f.start_line),
            |a, b| {
                a.hit_count += b.hit_count;
                a.end_line = a.end_line.max(b.end_line);
            },
        );
    }

    /// Lines holding at least one statement, sorted and deduplicated.
    #[must_use]
    pub fn instrumentable_lines(&self) -> Vec<u32> {
        self.line_hits().into_keys().collect()
    }

    /// Lines whose statements were never executed, sorted.
    #[must_use]
    pub fn uncovered_lines(&self) -> Vec<u32> {
        self.line_hits()
            .into_iter()
            .filter(|&(_, hits)| hits == 0)
            .map(|(line, _)| line)
            .collect()
    }

    /// Highest statement count on each line.
    fn line_hits(&self) -> BTreeMap<u32, u64> {
        let mut lines = BTreeMap::new();
        for s in &self.statements {
            let hits = lines.entry(s.line_number).or_insert(0);
            *hits = (*hits).max(s.hit_count);
        }
        lines
    }

    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        let line_hits = self.line_hits();
        CoverageSummary {
            lines: Totals::new(
                line_hits.len() as u64,
                line_hits.values().filter(|&&h| h > 0).count() as u64,
            ),
            statements: Totals::new(
                self.statements.len() as u64,
                self.statements.iter().filter(|s| s.hit_count > 0).count() as u64,
            ),
            functions: Totals::new(
                self.functions.len() as u64,
                self.functions.iter().filter(|f| f.hit_count > 0).count() as u64,
            ),
            branches: Totals::new(
                self.branches.len() as u64,
                self.branches.iter().filter(|b| b.hit_count > 0).count() as u64,
            ),
        }
    }
}

fn merge_by_key<T, K, F, A>(mine: &mut Vec<T>, theirs: Vec<T>, key: F, add: A)
where
    K: Ord,
    F: Fn(&T) -> K,
    A: Fn(&mut T, T),
{
    let mut merged: BTreeMap<K, T> = BTreeMap::new();
    for item in mine.drain(..).chain(theirs) {
        match merged.entry(key(&item)) {
            Entry::Occupied(mut e) => add(e.get_mut(), item),
            Entry::Vacant(e) => {
                e.insert(item);
            }
        }
    }
    *mine = merged.into_values().collect();
}

/// Covered/total counts for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub total: u64,
    pub covered: u64,
    pub skipped: u64,
    pub pct: f64,
}

impl Totals {
    #[must_use]
    pub fn new(total: u64, covered: u64) -> Self {
        Self {
            total,
            covered,
            skipped: 0,
            pct: percent(covered, total),
        }
    }

    #[must_use]
    pub fn add(&self, other: &Totals) -> Totals {
        Totals::new(self.total + other.total, self.covered + other.covered)
    }
}

impl Default for Totals {
    fn default() -> Self {
        Totals::new(0, 0)
    }
}

/// Summary across all four metrics, for one file or for a whole map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub lines: Totals,
    pub statements: Totals,
    pub functions: Totals,
    pub branches: Totals,
}

impl CoverageSummary {
    pub fn merge(&mut self, other: &CoverageSummary) {
        self.lines = self.lines.add(&other.lines);
        self.statements = self.statements.add(&other.statements);
        self.functions = self.functions.add(&other.functions);
        self.branches = self.branches.add(&other.branches);
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> &Totals {
        match metric {
            Metric::Lines => &self.lines,
            Metric::Functions => &self.functions,
            Metric::Branches => &self.branches,
            Metric::Statements => &self.statements,
        }
    }

    /// True when every metric is at 100%.
    #[must_use]
    pub fn is_full(&self) -> bool {
        Metric::ALL.iter().all(|&m| self.get(m).covered == self.get(m).total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(line_number: u32, hit_count: u64) -> StatementCoverage {
        StatementCoverage {
            line_number,
            hit_count,
        }
    }

    fn func(name: &str, start_line: u32, hit_count: u64) -> FunctionEntry {
        FunctionEntry {
            name: name.to_string(),
            start_line,
            end_line: start_line + 1,
            hit_count,
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 2), 50.0);
        assert_eq!(percent(1, 3), 33.333);
        assert_eq!(percent(2, 3), 66.667);
        assert_eq!(percent(0, 5), 0.0);
    }

    #[test]
    fn test_summary() {
        let file = FileCoverage {
            path: "/p/a.js".to_string(),
            statements: vec![stmt(1, 1), stmt(2, 0), stmt(4, 3)],
            branches: vec![BranchCoverage {
                line_number: 2,
                branch_index: 0,
                hit_count: 0,
            }],
            functions: vec![func("f", 1, 1), func("g", 4, 0)],
        };
        let summary = file.summary();
        assert_eq!(summary.lines, Totals::new(3, 2));
        assert_eq!(summary.statements.pct, 66.667);
        assert_eq!(summary.functions.pct, 50.0);
        assert_eq!(summary.branches.covered, 0);
        assert!(!summary.is_full());
        assert_eq!(file.uncovered_lines(), vec![2]);
        assert_eq!(file.instrumentable_lines(), vec![1, 2, 4]);
    }

    #[test]
    fn test_empty_file_summary() {
        let summary = FileCoverage::new("/p/empty.js".to_string()).summary();
        for metric in Metric::ALL {
            assert_eq!(summary.get(metric).pct, 100.0);
        }
        assert!(summary.is_full());
    }

    #[test]
    fn test_merge_is_additive_union() {
        let mut a = FileCoverage {
            path: "/p/a.js".to_string(),
            statements: vec![stmt(1, 1), stmt(2, 0)],
            branches: vec![],
            functions: vec![func("f", 1, 1)],
        };
        let b = FileCoverage {
            path: "/p/a.js".to_string(),
            statements: vec![stmt(2, 4), stmt(3, 1)],
            branches: vec![BranchCoverage {
                line_number: 3,
                branch_index: 0,
                hit_count: 1,
            }],
            functions: vec![func("f", 1, 2), func("g", 3, 0)],
        };
        a.merge(b);
        assert_eq!(a.statements, vec![stmt(1, 1), stmt(2, 4), stmt(3, 1)]);
        assert_eq!(a.branches.len(), 1);
        assert_eq!(a.functions, vec![func("f", 1, 3), func("g", 3, 0)]);
    }

    #[test]
    fn test_summary_merge() {
        let mut total = CoverageSummary::default();
        total.merge(&CoverageSummary {
            lines: Totals::new(4, 2),
            ..Default::default()
        });
        total.merge(&CoverageSummary {
            lines: Totals::new(4, 4),
            ..Default::default()
        });
        assert_eq!(total.lines, Totals::new(8, 6));
        assert_eq!(total.lines.pct, 75.0);
    }
}
