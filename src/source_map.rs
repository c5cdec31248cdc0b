//! Source maps recorded by the runtime, and source maps referenced from files
//! on disk.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use crate::normalize::file_url_to_path;
use crate::snapshot::SourceMapCacheEntry;

/// Filler byte used to synthesize placeholder source text.
const FILLER: char = '.';

static SOURCE_MAPPING_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?://[#@]|/\*[#@])[ \t]+sourceMappingURL=([^\s'\x22*]+)[ \t]*(?:\*/)?[ \t]*$")
        .unwrap()
});

/// What the converter receives in addition to the script's ranges.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sources {
    pub source_map: Option<Value>,
    /// Placeholder text with the original line structure, when the real
    /// source was not captured.
    pub source: Option<String>,
}

/// Source-map entries gathered from all snapshots of a run, keyed by the
/// normalized script identity.
#[derive(Debug, Clone, Default)]
pub struct SourceMapCache {
    entries: HashMap<String, SourceMapCacheEntry>,
}

impl SourceMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert under a normalized key. A later entry for the same key replaces
    /// the earlier one.
    pub fn insert(&mut self, key: &str, entry: SourceMapCacheEntry) {
        self.entries.insert(normalize_key(key), entry);
    }

    /// Absorb a snapshot's `source-map-cache`.
    pub fn absorb(&mut self, raw: BTreeMap<String, SourceMapCacheEntry>) {
        for (key, entry) in raw {
            self.insert(&key, entry);
        }
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<&SourceMapCacheEntry> {
        self.entries.get(&normalize_key(url))
    }

    /// Sources for a normalized script url. `None` means the converter should
    /// read the file from disk.
    #[must_use]
    pub fn sources_for(&self, url: &str) -> Option<Sources> {
        let entry = self.get(url)?;
        let data = entry.data.as_ref()?;
        Some(Sources {
            source_map: Some(data.clone()),
            source: entry.line_lengths.as_deref().map(synthesize_source),
        })
    }
}

/// Cache keys arrive as `file://` urls; store them as paths so they line up
/// with normalized script urls.
fn normalize_key(key: &str) -> String {
    match file_url_to_path(key) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => key.to_string(),
    }
}

/// Build placeholder source text: one line of filler per recorded length.
#[must_use]
pub fn synthesize_source(line_lengths: &[u64]) -> String {
    let total: u64 = line_lengths.iter().map(|len| len + 1).sum();
    let mut source = String::with_capacity(usize::try_from(total).unwrap_or(0));
    for &len in line_lengths {
        for _ in 0..len {
            source.push(FILLER);
        }
        source.push('\n');
    }
    source
}

/// Find and load the source map a file points to through a trailing
/// `sourceMappingURL` comment. Inline base64 `data:` urls and map files next
/// to the source are supported. Returns `None` when there is no usable map.
pub fn source_map_from_file(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    let url = SOURCE_MAPPING_URL_RE
        .captures_iter(&content)
        .last()?
        .get(1)?
        .as_str()
        .to_string();

    if let Some(data) = url.strip_prefix("data:") {
        return parse_data_url(data);
    }

    let map_path = match file_url_to_path(&url) {
        Ok(p) => p,
        Err(_) => path.parent()?.join(&url),
    };
    let raw = std::fs::read(&map_path)
        .map_err(|e| tracing::debug!("source map {} unreadable: {e}", map_path.display()))
        .ok()?;
    serde_json::from_slice(&raw)
        .map_err(|e| tracing::debug!("source map {} invalid: {e}", map_path.display()))
        .ok()
}

fn parse_data_url(data: &str) -> Option<Value> {
    let (meta, payload) = data.split_once(',')?;
    let bytes = if meta.split(';').any(|part| part == "base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| tracing::debug!("inline source map is not valid base64: {e}"))
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    serde_json::from_slice(&bytes).ok()
}
