//! Raw per-process coverage dumps as written by the runtime's built-in
//! instrumentation: one JSON file per process, holding a list of scripts with
//! block-level hit-count ranges.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Function name given to the placeholder function of a synthesized
/// zero-coverage script.
pub const EMPTY_REPORT_FN: &str = "(empty-report)";

/// A byte range in a script paired with the number of times it executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRange {
    /// Start offset (inclusive).
    pub start_offset: u64,
    /// End offset (exclusive).
    pub end_offset: u64,
    /// Number of times this range was executed.
    pub count: u64,
}

impl CoverageRange {
    pub fn new(start_offset: u64, end_offset: u64, count: u64) -> Self {
        Self {
            start_offset,
            end_offset,
            count,
        }
    }
}

/// Coverage for a single function. The widest range is the function body; the
/// remaining ranges are nested blocks whose count overrides their parent's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCoverage {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub ranges: Vec<CoverageRange>,
    #[serde(default)]
    pub is_block_coverage: bool,
}

impl FunctionCoverage {
    /// The widest range of the function, i.e. the one that identifies it.
    #[must_use]
    pub fn root_range(&self) -> Option<&CoverageRange> {
        self.ranges.iter().min_by(|a, b| {
            a.start_offset
                .cmp(&b.start_offset)
                .then(b.end_offset.cmp(&a.end_offset))
        })
    }

    /// Whether this is the placeholder emitted for never-executed files.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.function_name == EMPTY_REPORT_FN
    }
}

/// Coverage for one script. `script_id` is process-local; `url` is the
/// identity used for merging once normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCoverage {
    #[serde(default, deserialize_with = "script_id_from_json")]
    pub script_id: String,
    pub url: String,
    #[serde(default)]
    pub functions: Vec<FunctionCoverage>,
}

/// Source-map data captured by the runtime for one script.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapCacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_lengths: Option<Vec<u64>>,
}

/// One process's coverage dump.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub result: Vec<ScriptCoverage>,
    #[serde(
        default,
        rename = "source-map-cache",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub source_map_cache: BTreeMap<String, SourceMapCacheEntry>,
}

impl RuntimeSnapshot {
    pub fn new(result: Vec<ScriptCoverage>) -> Self {
        Self {
            result,
            source_map_cache: BTreeMap::new(),
        }
    }

    /// Check that a parsed JSON document looks like a coverage dump, i.e. has
    /// a `result` list.
    #[must_use]
    pub fn is_coverage_object(value: &Value) -> bool {
        value.get("result").is_some_and(Value::is_array)
    }

    /// Look up a script by url.
    #[must_use]
    pub fn script(&self, url: &str) -> Option<&ScriptCoverage> {
        self.result.iter().find(|s| s.url == url)
    }
}

/// The runtime writes `scriptId` as a string, but hand-written and older
/// dumps use a number.
fn script_id_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for scriptId, got {other}"
        ))),
    }
}
