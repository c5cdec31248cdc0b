//! Output formatting for a coverage map.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::config::Watermarks;
use crate::coverage_map::CoverageMap;
use crate::error::CovmergeError;
use crate::exclude::to_slash;
use crate::model::{CoverageSummary, Metric, Totals};

/// Trait for formatting a coverage map.
pub trait ReportFormatter {
    /// Format the report to a string.
    fn format(&self, map: &CoverageMap) -> String;

    /// File the output is written to inside the reports directory. `None`
    /// means the output goes to stdout.
    fn output_file(&self) -> Option<&'static str> {
        None
    }
}

/// The reporters that can be requested by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reporter {
    Text,
    TextSummary,
    JsonSummary,
    Json,
}

impl FromStr for Reporter {
    type Err = CovmergeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "text" => Ok(Reporter::Text),
            "text-summary" => Ok(Reporter::TextSummary),
            "json-summary" => Ok(Reporter::JsonSummary),
            "json" => Ok(Reporter::Json),
            other => Err(CovmergeError::UnknownReporter(other.to_string())),
        }
    }
}

impl Reporter {
    /// Build the formatter. `cwd` is used to shorten paths in text output.
    #[must_use]
    pub fn formatter(
        self,
        cwd: &Path,
        skip_full: bool,
        watermarks: Watermarks,
    ) -> Box<dyn ReportFormatter> {
        match self {
            Reporter::Text => Box::new(TextFormatter {
                cwd: cwd.to_path_buf(),
                skip_full,
            }),
            Reporter::TextSummary => Box::new(TextSummaryFormatter { watermarks }),
            Reporter::JsonSummary => Box::new(JsonSummaryFormatter),
            Reporter::Json => Box::new(JsonFormatter),
        }
    }
}

/// Per-file table with an `All files` row first.
pub struct TextFormatter {
    pub cwd: PathBuf,
    pub skip_full: bool,
}

const TABLE_HEADERS: [&str; 6] = [
    "File",
    "% Stmts",
    "% Branch",
    "% Funcs",
    "% Lines",
    "Uncovered Line #s",
];

impl ReportFormatter for TextFormatter {
    fn format(&self, map: &CoverageMap) -> String {
        let mut rows: Vec<[String; 6]> = vec![summary_row("All files", &map.summary(), "")];
        for file in map.iter() {
            let summary = file.summary();
            if self.skip_full && summary.is_full() {
                continue;
            }
            let name = Path::new(&file.path)
                .strip_prefix(&self.cwd)
                .map_or_else(|_| file.path.clone(), to_slash);
            let uncovered = format_line_ranges(&file.uncovered_lines(), &file.instrumentable_lines());
            rows.push(summary_row(&format!(" {name}"), &summary, &uncovered));
        }

        let mut widths = TABLE_HEADERS.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        let separator = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("|");
        let render = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(widths.iter())
                .enumerate()
                .map(|(idx, (cell, &w))| {
                    if idx == 0 || idx == 5 {
                        format!(" {cell:<w$} ")
                    } else {
                        format!(" {cell:>w$} ")
                    }
                })
                .collect::<Vec<_>>()
                .join("|")
        };

        let mut out = String::new();
        let headers = TABLE_HEADERS.map(str::to_string);
        writeln!(out, "{separator}").unwrap();
        writeln!(out, "{}", render(&headers).trim_end()).unwrap();
        writeln!(out, "{separator}").unwrap();
        for row in &rows {
            writeln!(out, "{}", render(row).trim_end()).unwrap();
        }
        writeln!(out, "{separator}").unwrap();
        out
    }
}

fn summary_row(name: &str, summary: &CoverageSummary, uncovered: &str) -> [String; 6] {
    [
        name.to_string(),
        summary.statements.pct.to_string(),
        summary.branches.pct.to_string(),
        summary.functions.pct.to_string(),
        summary.lines.pct.to_string(),
        uncovered.to_string(),
    ]
}

/// Four summary lines, each tagged with its watermark level.
pub struct TextSummaryFormatter {
    pub watermarks: Watermarks,
}

impl ReportFormatter for TextSummaryFormatter {
    fn format(&self, map: &CoverageMap) -> String {
        let summary = map.summary();
        let mut out = String::new();
        writeln!(out, "{:=^80}", " Coverage summary ").unwrap();
        for (label, metric) in [
            ("Statements", Metric::Statements),
            ("Branches", Metric::Branches),
            ("Functions", Metric::Functions),
            ("Lines", Metric::Lines),
        ] {
            let Totals {
                total,
                covered,
                pct,
                ..
            } = *summary.get(metric);
            let level = self.watermarks.classify(metric, pct);
            writeln!(
                out,
                "{label:<12} : {pct}% ( {covered}/{total} ) [{}]",
                level.as_str()
            )
            .unwrap();
        }
        writeln!(out, "{}", "=".repeat(80)).unwrap();
        out
    }
}

/// `coverage-summary.json`: the total and every file's summary.
pub struct JsonSummaryFormatter;

impl ReportFormatter for JsonSummaryFormatter {
    fn format(&self, map: &CoverageMap) -> String {
        let mut out = Map::new();
        out.insert("total".to_string(), json!(map.summary()));
        for file in map.iter() {
            out.insert(file.path.clone(), json!(file.summary()));
        }
        format!("{:#}\n", Value::Object(out))
    }

    fn output_file(&self) -> Option<&'static str> {
        Some("coverage-summary.json")
    }
}

/// `coverage-final.json`: full per-file detail.
pub struct JsonFormatter;

impl ReportFormatter for JsonFormatter {
    fn format(&self, map: &CoverageMap) -> String {
        format!("{:#}\n", json!(map))
    }

    fn output_file(&self) -> Option<&'static str> {
        Some("coverage-final.json")
    }
}

/// Maximum number of consecutive non-instrumentable lines that can be bridged
/// when coalescing uncovered ranges.
const MAX_BRIDGE_GAP: u32 = 2;

/// Coalesce sorted line numbers into `(start, end)` ranges, bridging small
/// gaps where every line in the gap is non-instrumentable.
///
/// A gap between two uncovered lines is bridged only when:
/// 1. Every line in the gap is absent from `all_instrumentable`, AND
/// 2. The gap is at most [`MAX_BRIDGE_GAP`] lines wide.
///
/// Both `lines` and `all_instrumentable` must be sorted and deduplicated.
#[must_use]
pub fn coalesce_ranges(lines: &[u32], all_instrumentable: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    debug_assert!(
        lines.windows(2).all(|w| w[0] < w[1]),
        "coalesce_ranges requires sorted, deduplicated input"
    );

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut start = first;
    let mut end = first;

    for &line in rest {
        let gap = line - end - 1;
        if gap <= MAX_BRIDGE_GAP
            && (end + 1..line).all(|l| all_instrumentable.binary_search(&l).is_err())
        {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }

    ranges.push((start, end));
    ranges
}

/// Format line numbers into compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32], all_instrumentable: &[u32]) -> String {
    coalesce_ranges(lines, all_instrumentable)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
