//! Turning merged byte-range coverage into file-level coverage.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{CovmergeError, Result};
use crate::model::{BranchCoverage, FileCoverage, FunctionEntry, StatementCoverage};
use crate::snapshot::{CoverageRange, ScriptCoverage};
use crate::source_map::Sources;

/// Name of the built-in converter.
pub const LINES_CONVERTER: &str = "lines";

/// Translates one script's ranges into statements, branches and functions.
pub trait Converter {
    fn convert(
        &self,
        path: &Path,
        script: &ScriptCoverage,
        sources: Option<&Sources>,
    ) -> Result<FileCoverage>;
}

/// The converter picked for a run, or the reason none could be picked.
pub enum ConverterBackend {
    Available(Box<dyn Converter>),
    Unavailable { backend: String, remediation: String },
}

impl std::fmt::Debug for ConverterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConverterBackend::Available(_) => f.write_str("Available(..)"),
            ConverterBackend::Unavailable { backend, .. } => {
                write!(f, "Unavailable({backend})")
            }
        }
    }
}

impl ConverterBackend {
    /// Pick a backend by name. Unknown names are not an error yet; asking the
    /// backend for its converter is.
    pub fn select(name: &str, wrapper_length: u64) -> Self {
        match name {
            LINES_CONVERTER => {
                ConverterBackend::Available(Box::new(LineConverter::new(wrapper_length)))
            }
            "monocart" => ConverterBackend::Unavailable {
                backend: name.to_string(),
                remediation: "It relies on the external monocart-coverage-reports engine, which \
                              is not bundled. Use --converter lines instead."
                    .to_string(),
            },
            other => ConverterBackend::Unavailable {
                backend: other.to_string(),
                remediation: format!("Supported converters: {LINES_CONVERTER}."),
            },
        }
    }

    pub fn converter(&self) -> Result<&dyn Converter> {
        match self {
            ConverterBackend::Available(converter) => Ok(converter.as_ref()),
            ConverterBackend::Unavailable {
                backend,
                remediation,
            } => Err(CovmergeError::ConverterUnavailable {
                backend: backend.clone(),
                remediation: remediation.clone(),
            }),
        }
    }
}

/// Attributes range counts to source lines using nothing but line
/// boundaries.
///
/// Every non-blank line is a statement whose count is that of the innermost
/// range fully containing the line's trimmed text. Functions are reported with
/// their root count, except the top-level module wrapper. The nested ranges
/// of block-coverage functions become branch arms on the line they start.
#[derive(Debug, Clone, Default)]
pub struct LineConverter {
    wrapper_length: u64,
}

impl LineConverter {
    pub fn new(wrapper_length: u64) -> Self {
        Self { wrapper_length }
    }

    fn shift(&self, range: &CoverageRange) -> (u64, u64) {
        (
            range.start_offset.saturating_sub(self.wrapper_length),
            range.end_offset.saturating_sub(self.wrapper_length),
        )
    }
}

impl Converter for LineConverter {
    fn convert(
        &self,
        path: &Path,
        script: &ScriptCoverage,
        sources: Option<&Sources>,
    ) -> Result<FileCoverage> {
        // Bytes, not text: range offsets are byte offsets and the file need
        // not be valid UTF-8.
        let source: Cow<'_, [u8]> = match sources.and_then(|s| s.source.as_deref()) {
            Some(source) => Cow::Borrowed(source.as_bytes()),
            None => Cow::Owned(std::fs::read(path).map_err(|e| CovmergeError::io(path, e))?),
        };
        let lines = SourceLines::new(&source);

        let mut file = FileCoverage::new(path.to_string_lossy().into_owned());
        file.statements = self.statements(&lines, script);

        let mut anonymous = 0;
        for func in &script.functions {
            if func.is_placeholder() {
                continue;
            }
            let Some(root) = func.root_range() else {
                continue;
            };
            if func.function_name.is_empty() && root.start_offset == 0 {
                continue;
            }

            let (start, end) = self.shift(root);
            let name = if func.function_name.is_empty() {
                let name = format!("(anonymous_{anonymous})");
                anonymous += 1;
                name
            } else {
                func.function_name.clone()
            };
            file.functions.push(FunctionEntry {
                name,
                start_line: lines.line_of(start),
                end_line: lines.line_of(end.saturating_sub(1).max(start)),
                hit_count: root.count,
            });
        }

        let mut arms_per_line: HashMap<u32, u32> = HashMap::new();
        for func in script.functions.iter().filter(|f| f.is_block_coverage) {
            let Some(root) = func.root_range() else {
                continue;
            };
            for range in func.ranges.iter().filter(|r| !std::ptr::eq(*r, root)) {
                let line_number = lines.line_of(self.shift(range).0);
                let index = arms_per_line.entry(line_number).or_insert(0);
                file.branches.push(BranchCoverage {
                    line_number,
                    branch_index: *index,
                    hit_count: range.count,
                });
                *index += 1;
            }
        }

        Ok(file)
    }
}

impl LineConverter {
    fn statements(&self, lines: &SourceLines, script: &ScriptCoverage) -> Vec<StatementCoverage> {
        let mut ranges: Vec<(u64, u64, u64)> = script
            .functions
            .iter()
            .flat_map(|f| f.ranges.iter())
            .map(|r| {
                let (start, end) = self.shift(r);
                (start, end, r.count)
            })
            .collect();
        // Outer ranges first so inner ones override them; on identical bounds
        // the larger count comes last.
        ranges.sort_by_key(|&(start, end, count)| (start, Reverse(end), count));

        // Sweep lines and ranges together. The stack holds, in sorted order,
        // every range started so far that may still contain a later line.
        let mut pending = ranges.into_iter().peekable();
        let mut open: Vec<(u64, u64, u64)> = Vec::new();
        let mut statements = Vec::new();
        for (idx, span) in lines.spans.iter().enumerate() {
            let Some((start, end)) = *span else {
                continue;
            };
            while let Some(range) = pending.next_if(|&(rs, _, _)| rs <= start) {
                while open.last().is_some_and(|&(_, top_end, _)| top_end <= range.0) {
                    open.pop();
                }
                open.push(range);
            }
            let hit_count = open
                .iter()
                .rev()
                .find(|&&(_, re, _)| end <= re)
                .map_or(0, |&(_, _, count)| count);
            statements.push(StatementCoverage {
                line_number: idx as u32 + 1,
                hit_count,
            });
        }
        statements
    }
}

/// Byte offsets of each line of a source text.
struct SourceLines {
    starts: Vec<u64>,
    /// Trimmed `[start, end)` of every line, `None` for blank lines.
    spans: Vec<Option<(u64, u64)>>,
}

impl SourceLines {
    fn new(source: &[u8]) -> Self {
        let mut starts = Vec::new();
        let mut spans = Vec::new();
        let mut offset = 0u64;
        for line in source.split_inclusive(|&b| b == b'\n') {
            starts.push(offset);
            let leading = line.len() - line.trim_ascii_start().len();
            let trimmed = line.trim_ascii();
            spans.push(if trimmed.is_empty() {
                None
            } else {
                let start = offset + leading as u64;
                Some((start, start + trimmed.len() as u64))
            });
            offset += line.len() as u64;
        }
        if starts.is_empty() {
            starts.push(0);
        }
        Self { starts, spans }
    }

    /// 1-based line holding `offset`. Offsets past the end map to the last
    /// line.
    fn line_of(&self, offset: u64) -> u32 {
        self.starts.partition_point(|&s| s <= offset).max(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FunctionCoverage, EMPTY_REPORT_FN};

    const SOURCE: &str = "function f() {\n  return 1;\n}\n\nf();\n";

    fn script(functions: Vec<FunctionCoverage>) -> ScriptCoverage {
        ScriptCoverage {
            script_id: "0".to_string(),
            url: "/p/a.js".to_string(),
            functions,
        }
    }

    fn func(name: &str, ranges: &[(u64, u64, u64)], is_block_coverage: bool) -> FunctionCoverage {
        FunctionCoverage {
            function_name: name.to_string(),
            ranges: ranges
                .iter()
                .map(|&(s, e, c)| CoverageRange::new(s, e, c))
                .collect(),
            is_block_coverage,
        }
    }

    fn sources(source: &str) -> Sources {
        Sources {
            source_map: None,
            source: Some(source.to_string()),
        }
    }

    fn convert(script: &ScriptCoverage, source: &str) -> FileCoverage {
        LineConverter::new(0)
            .convert(Path::new("/p/a.js"), script, Some(&sources(source)))
            .unwrap()
    }

    #[test]
    fn test_line_spans() {
        let lines = SourceLines::new(SOURCE.as_bytes());
        assert_eq!(lines.spans.len(), 5);
        assert_eq!(lines.spans[1], Some((17, 26)));
        assert_eq!(lines.spans[3], None);
        assert_eq!(lines.line_of(0), 1);
        assert_eq!(lines.line_of(15), 2);
        assert_eq!(lines.line_of(1000), 5);
    }

    #[test]
    fn test_uncalled_function() {
        let script = script(vec![
            func("", &[(0, 35, 1)], false),
            func("f", &[(0, 28, 0)], false),
        ]);
        let file = convert(&script, SOURCE);
        let hits: Vec<_> = file.statements.iter().map(|s| (s.line_number, s.hit_count)).collect();
        assert_eq!(hits, vec![(1, 0), (2, 0), (3, 0), (5, 1)]);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "f");
        assert_eq!(file.functions[0].start_line, 1);
        assert_eq!(file.functions[0].end_line, 3);
        assert_eq!(file.functions[0].hit_count, 0);
    }

    #[test]
    fn test_block_ranges_become_branches() {
        let source = "if (x) {\n  a();\n} else {\n  b();\n}\n";
        let script = script(vec![func("", &[(0, 34, 1), (26, 32, 0)], true)]);
        let file = convert(&script, source);
        let hits: Vec<_> = file.statements.iter().map(|s| s.hit_count).collect();
        assert_eq!(hits, vec![1, 1, 1, 0, 1]);
        assert_eq!(file.branches.len(), 1);
        assert_eq!(file.branches[0].line_number, 4);
        assert_eq!(file.branches[0].hit_count, 0);
        assert!(file.functions.is_empty());
    }

    #[test]
    fn test_identical_bounds_larger_count_wins() {
        let script = script(vec![
            func("", &[(0, 35, 0)], false),
            func("g", &[(0, 35, 3)], false),
        ]);
        let file = convert(&script, SOURCE);
        assert!(file.statements.iter().all(|s| s.hit_count == 3));
    }

    #[test]
    fn test_anonymous_functions_are_numbered() {
        let script = script(vec![
            func("", &[(0, 35, 1)], false),
            func("", &[(5, 10, 1)], false),
            func("", &[(30, 34, 0)], false),
        ]);
        let file = convert(&script, SOURCE);
        let names: Vec<_> = file.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["(anonymous_0)", "(anonymous_1)"]);
    }

    #[test]
    fn test_wrapper_length_shifts_offsets() {
        let script = script(vec![
            func("", &[(0, 72, 1)], false),
            func("f", &[(62, 67, 0)], false),
        ]);
        let file = LineConverter::new(62)
            .convert(Path::new("/p/a.js"), &script, Some(&sources("a();\nb();\n")))
            .unwrap();
        assert_eq!(file.functions[0].start_line, 1);
        assert_eq!(file.statements[0].hit_count, 0);
        assert_eq!(file.statements[1].hit_count, 1);
    }

    #[test]
    fn test_placeholder_converts_to_zero_coverage() {
        let script = script(vec![func(EMPTY_REPORT_FN, &[(0, 35, 0)], false)]);
        let file = convert(&script, SOURCE);
        let summary = file.summary();
        assert_eq!(summary.statements.covered, 0);
        assert_eq!(summary.statements.total, 4);
        assert_eq!(summary.functions.total, 0);
    }

    #[test]
    fn test_reads_source_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, SOURCE).unwrap();
        let script = script(vec![func("", &[(0, 35, 2)], false)]);
        let file = LineConverter::new(0).convert(&path, &script, None).unwrap();
        assert_eq!(file.statements.len(), 4);

        let missing = LineConverter::new(0).convert(&dir.path().join("gone.js"), &script, None);
        assert!(matches!(missing, Err(CovmergeError::Io { .. })));
    }

    #[test]
    fn test_non_utf8_source_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.js");
        // Latin-1 comment on line 1; line 2 starts at byte 13.
        std::fs::write(&path, b"a(); // caf\xe9\nb();\n").unwrap();
        let script = script(vec![func("", &[(0, 18, 1), (13, 17, 0)], true)]);
        let file = LineConverter::new(0).convert(&path, &script, None).unwrap();
        let hits: Vec<_> = file.statements.iter().map(|s| (s.line_number, s.hit_count)).collect();
        assert_eq!(hits, vec![(1, 1), (2, 0)]);
        assert_eq!(file.branches[0].line_number, 2);
    }

    #[test]
    fn test_nested_and_sibling_ranges() {
        let source = "a\nb\nc\nd\ne\nf\n";
        let script = script(vec![func(
            "",
            &[
                (0, 12, 1),
                (2, 6, 0),
                (4, 6, 5),
                (8, 10, 7),
                (9, 12, 2),
            ],
            true,
        )]);
        let file = convert(&script, source);
        let hits: Vec<_> = file.statements.iter().map(|s| s.hit_count).collect();
        assert_eq!(hits, vec![1, 0, 5, 1, 7, 2]);
    }

    #[test]
    fn test_backend_selection() {
        assert!(ConverterBackend::select("lines", 0).converter().is_ok());
        let err = ConverterBackend::select("monocart", 0).converter().err().unwrap();
        assert!(err.to_string().contains("monocart"));
        assert!(matches!(
            ConverterBackend::select("nope", 0).converter(),
            Err(CovmergeError::ConverterUnavailable { .. })
        ));
    }
}
