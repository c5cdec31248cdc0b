//! The run-scoped pipeline: load snapshots, normalize, merge, convert and
//! aggregate into a [`CoverageMap`].

use std::path::{Path, PathBuf};

use crate::config::ReportOptions;
use crate::convert::ConverterBackend;
use crate::coverage_map::CoverageMap;
use crate::error::Result;
use crate::exclude::ExcludeRuleset;
use crate::loader::SnapshotLoader;
use crate::merge::merge_process_covs;
use crate::normalize::{FileIndex, UrlNormalizer};
use crate::snapshot::RuntimeSnapshot;
use crate::source_map::SourceMapCache;
use crate::uncovered::include_uncovered_files;

/// Owns everything one run accumulates: the inclusion cache, the source-map
/// cache and the final map. Build a new engine for every run.
#[derive(Debug)]
pub struct CoverageEngine {
    options: ReportOptions,
    cwd: PathBuf,
    normalizer: UrlNormalizer,
    source_maps: SourceMapCache,
    backend: ConverterBackend,
    loader: SnapshotLoader,
    coverage_map: Option<CoverageMap>,
}

impl CoverageEngine {
    pub fn new(options: ReportOptions) -> Result<Self> {
        let cwd = options.cwd()?;
        let ruleset = ExcludeRuleset::new(&cwd, options.ruleset_config())?;
        let normalizer =
            UrlNormalizer::new(ruleset, options.omit_relative, options.exclude_after_remap);
        let backend = ConverterBackend::select(&options.converter, options.wrapper_length);
        let loader = SnapshotLoader::new(options.temp_dir()?);

        Ok(Self {
            options,
            cwd,
            normalizer,
            source_maps: SourceMapCache::new(),
            backend,
            loader,
            coverage_map: None,
        })
    }

    #[must_use]
    pub fn source_maps(&self) -> &SourceMapCache {
        &self.source_maps
    }

    /// Load every snapshot at once, normalize and merge them.
    pub fn merged_process_coverage(&mut self) -> Result<RuntimeSnapshot> {
        let mut index = FileIndex::new();
        let mut snapshots = Vec::new();
        for snapshot in self.loader.load_all()? {
            snapshots.push(self.normalize(snapshot, &mut index));
        }
        tracing::debug!(
            "loaded {} snapshots from {}",
            snapshots.len(),
            self.loader.dir().display()
        );

        if self.options.all {
            let empty = self.uncovered(&index)?;
            snapshots.insert(0, empty);
        }
        Ok(merge_process_covs(snapshots))
    }

    /// Same result as [`Self::merged_process_coverage`], but only one snapshot
    /// is held in memory next to the running total.
    pub fn merged_process_coverage_incremental(&mut self) -> Result<RuntimeSnapshot> {
        let mut index = FileIndex::new();
        let mut acc = None;
        for file in self.loader.list_files()? {
            acc = self.process_file(&file, acc, &mut index);
        }

        let acc = acc.unwrap_or_default();
        if self.options.all {
            let empty = self.uncovered(&index)?;
            return Ok(merge_process_covs([empty, acc]));
        }
        Ok(acc)
    }

    /// Fold one snapshot file into the running total. A file that cannot be
    /// read or parsed leaves the total unchanged.
    pub fn process_file(
        &mut self,
        path: &Path,
        acc: Option<RuntimeSnapshot>,
        index: &mut FileIndex,
    ) -> Option<RuntimeSnapshot> {
        let snapshot = match self.loader.read_snapshot(path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::warn!("skipping {}: not a coverage snapshot", path.display());
                return acc;
            }
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
                return acc;
            }
        };
        let normalized = self.normalize(snapshot, index);
        Some(merge_process_covs(acc.into_iter().chain([normalized])))
    }

    /// Normalize a snapshot and move its source maps into the shared cache.
    fn normalize(&mut self, snapshot: RuntimeSnapshot, index: &mut FileIndex) -> RuntimeSnapshot {
        let mut normalized = self.normalizer.normalize_snapshot(snapshot, index);
        self.source_maps
            .absorb(std::mem::take(&mut normalized.source_map_cache));
        normalized
    }

    fn uncovered(&mut self, index: &FileIndex) -> Result<RuntimeSnapshot> {
        let roots = self.options.roots()?;
        let empty = include_uncovered_files(
            &roots,
            self.normalizer.ruleset(),
            index,
            &mut self.source_maps,
        );
        tracing::debug!("synthesized {} never-loaded files", empty.len());
        Ok(RuntimeSnapshot::new(empty))
    }

    /// Build the coverage map, once per run. Later calls return the same map.
    ///
    /// Fails only when the configured converter is unavailable; scripts that
    /// cannot be converted are logged and left out. With `exclude-after-remap`
    /// the include/exclude rules are applied to converted paths here.
    pub fn coverage_map(&mut self) -> Result<&CoverageMap> {
        if self.coverage_map.is_none() {
            let map = self.build_coverage_map()?;
            self.coverage_map = Some(map);
        }
        Ok(self.coverage_map.get_or_insert_with(CoverageMap::new))
    }

    fn build_coverage_map(&mut self) -> Result<CoverageMap> {
        self.backend.converter()?;

        let merged = if self.options.merge_async {
            self.merged_process_coverage_incremental()?
        } else {
            self.merged_process_coverage()?
        };

        let converter = self.backend.converter()?;
        let base = self
            .options
            .resolve
            .as_ref()
            .map_or_else(|| self.cwd.clone(), |resolve| self.cwd.join(resolve));

        let mut map = CoverageMap::new();
        for script in &merged.result {
            let path = base.join(&script.url);
            let sources = self.source_maps.sources_for(&script.url);
            let file = match converter.convert(&path, script, sources.as_ref()) {
                Ok(file) => file,
                Err(e) => {
                    tracing::debug!("skipping {}: {e}", path.display());
                    continue;
                }
            };
            // Kept unfiltered by the normalizer; the rules apply to the
            // converted path instead.
            if self.options.exclude_after_remap
                && !self.normalizer.should_instrument(&file.path)
            {
                tracing::debug!("excluding {} after conversion", file.path);
                continue;
            }
            map.merge_file(file);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CovmergeError;

    fn options(dir: &Path) -> ReportOptions {
        ReportOptions {
            cwd: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn write_snapshot(dir: &Path, name: &str, body: &str) {
        let tmp = dir.join("coverage/tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join(name), body).unwrap();
    }

    fn snapshot_for(path: &Path, count: u64) -> String {
        format!(
            r#"{{"result":[{{"scriptId":"7","url":"file://{}","functions":[{{"functionName":"","isBlockCoverage":true,"ranges":[{{"startOffset":0,"endOffset":5,"count":{count}}}]}}]}}]}}"#,
            path.display()
        )
    }

    #[test]
    fn test_coverage_map_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        std::fs::write(&source, "a();\n").unwrap();
        write_snapshot(dir.path(), "1.json", &snapshot_for(&source, 1));

        let mut engine = CoverageEngine::new(options(dir.path())).unwrap();
        let first = engine.coverage_map().unwrap().clone();
        // A snapshot written after the first build is not picked up.
        write_snapshot(dir.path(), "2.json", &snapshot_for(&source, 1));
        let second = engine.coverage_map().unwrap();
        assert_eq!(&first, second);
        let key = source.to_string_lossy();
        assert_eq!(first.file_coverage_for(&key).unwrap().statements[0].hit_count, 1);
    }

    #[test]
    fn test_unavailable_converter_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "1.json", r#"{"result":[]}"#);
        let mut engine = CoverageEngine::new(ReportOptions {
            converter: "monocart".to_string(),
            ..options(dir.path())
        })
        .unwrap();
        assert!(matches!(
            engine.coverage_map(),
            Err(CovmergeError::ConverterUnavailable { .. })
        ));
        // Merging does not need a converter.
        assert!(engine.merged_process_coverage().is_ok());
    }

    #[test]
    fn test_source_maps_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.js");
        write_snapshot(
            dir.path(),
            "1.json",
            &format!(
                r#"{{"result":[],"source-map-cache":{{"file://{}":{{"data":{{"version":3}},"lineLengths":[4]}}}}}}"#,
                source.display()
            ),
        );
        let mut engine = CoverageEngine::new(options(dir.path())).unwrap();
        engine.merged_process_coverage_incremental().unwrap();
        let sources = engine
            .source_maps()
            .sources_for(&source.to_string_lossy())
            .unwrap();
        assert_eq!(sources.source.as_deref(), Some("....\n"));
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.js");
        write_snapshot(dir.path(), "1.json", &snapshot_for(&gone, 1));
        let mut engine = CoverageEngine::new(options(dir.path())).unwrap();
        assert!(engine.coverage_map().unwrap().is_empty());
    }
}
