//! Canonicalization of script urls into file paths, and the per-run
//! inclusion decision for each script.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{CovmergeError, Result};
use crate::exclude::ExcludeRuleset;
use crate::snapshot::{RuntimeSnapshot, ScriptCoverage};

const NODE_SCHEME: &str = "node:";
const FILE_SCHEME: &str = "file://";

/// Every absolute path seen while normalizing snapshots, whether or not the
/// script was kept.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    paths: BTreeSet<PathBuf>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

/// Convert a `file://` url into a filesystem path.
///
/// Only local urls are accepted: an empty host or `localhost`. Percent
/// escapes are decoded.
pub fn file_url_to_path(url: &str) -> Result<PathBuf> {
    let rest = url
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| CovmergeError::InvalidUrl(url.to_string()))?;
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if !rest.starts_with('/') {
        return Err(CovmergeError::InvalidUrl(url.to_string()));
    }
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let decoded = percent_decode(rest).ok_or_else(|| CovmergeError::InvalidUrl(url.to_string()))?;
    if decoded.contains('\0') {
        return Err(CovmergeError::InvalidUrl(url.to_string()));
    }
    Ok(PathBuf::from(decoded))
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            // An encoded separator would change the path structure.
            if byte == b'/' {
                return None;
            }
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Rewrite a raw script url into its canonical form.
///
/// Built-in modules (`node:fs`) become `fs.js` so extension filters still
/// apply to them. `file://` urls become paths. Anything else is returned
/// unchanged.
pub fn normalize_url(raw: &str) -> Result<String> {
    if let Some(name) = raw.strip_prefix(NODE_SCHEME) {
        return Ok(format!("{name}.js"));
    }
    if raw.starts_with(FILE_SCHEME) {
        let path = file_url_to_path(raw)?;
        return Ok(path.to_string_lossy().into_owned());
    }
    Ok(raw.to_string())
}

/// Decides, once per path, whether a script is kept.
#[derive(Debug)]
pub struct UrlNormalizer {
    ruleset: ExcludeRuleset,
    omit_relative: bool,
    exclude_after_remap: bool,
    instrument_cache: HashMap<String, bool>,
}

impl UrlNormalizer {
    pub fn new(ruleset: ExcludeRuleset, omit_relative: bool, exclude_after_remap: bool) -> Self {
        Self {
            ruleset,
            omit_relative,
            exclude_after_remap,
            instrument_cache: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ruleset(&self) -> &ExcludeRuleset {
        &self.ruleset
    }

    /// Memoized [`ExcludeRuleset::should_instrument`].
    pub fn should_instrument(&mut self, path: &str) -> bool {
        if let Some(&cached) = self.instrument_cache.get(path) {
            return cached;
        }
        let result = self.ruleset.should_instrument(path);
        self.instrument_cache.insert(path.to_string(), result);
        result
    }

    /// Number of memoized inclusion decisions.
    #[must_use]
    pub fn cached_decisions(&self) -> usize {
        self.instrument_cache.len()
    }

    /// Normalize one script's url and decide whether to keep it. Absolute
    /// paths are recorded in `index` either way.
    pub fn normalize_script(
        &mut self,
        mut script: ScriptCoverage,
        index: &mut FileIndex,
    ) -> Option<ScriptCoverage> {
        let url = match normalize_url(&script.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("dropping script {}: {e}", script.url);
                return None;
            }
        };

        let is_absolute = Path::new(&url).is_absolute();
        if is_absolute {
            index.insert(&url);
        }

        let keep = !self.omit_relative
            || (is_absolute && self.exclude_after_remap)
            || self.should_instrument(&url);

        if keep {
            script.url = url;
            Some(script)
        } else {
            None
        }
    }

    /// Normalize every script of a snapshot, dropping excluded ones. The
    /// source-map cache is passed through untouched.
    pub fn normalize_snapshot(
        &mut self,
        snapshot: RuntimeSnapshot,
        index: &mut FileIndex,
    ) -> RuntimeSnapshot {
        let result = snapshot
            .result
            .into_iter()
            .filter_map(|script| self.normalize_script(script, index))
            .collect();
        RuntimeSnapshot {
            result,
            source_map_cache: snapshot.source_map_cache,
        }
    }
}
