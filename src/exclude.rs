//! Include/exclude rules deciding which files count toward coverage.
//!
//! Patterns are globs matched against paths relative to the working
//! directory, with `/` as separator. `{a,b}` alternatives are expanded before
//! compiling, and every pattern also matches everything below it when it names
//! a directory.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::error::{CovmergeError, Result};

/// Extensions considered source files unless configured otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".js", ".cjs", ".mjs", ".ts", ".cts", ".mts", ".tsx", ".jsx",
];

/// Test files, fixtures and tool configuration excluded by default.
pub const DEFAULT_EXCLUDE: &[&str] = &[
    "coverage/**",
    "packages/*/test{,s}/**",
    "**/*.d.ts",
    "test{,s}/**",
    "test{,-*}.{js,cjs,mjs,ts,tsx,jsx}",
    "**/*{.,-}test.{js,cjs,mjs,ts,tsx,jsx}",
    "**/__tests__/**",
    "**/{ava,babel,nyc}.config.{js,cjs,mjs}",
    "**/jest.config.{js,cjs,mjs,ts}",
    "**/{karma,rollup,webpack}.config.js",
    "**/.{eslint,mocha}rc.{js,cjs}",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const NODE_MODULES: &str = "node_modules";

/// Plain configuration for an [`ExcludeRuleset`].
#[derive(Debug, Clone)]
pub struct RulesetConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub extension: Vec<String>,
    /// Reject files outside the working directory.
    pub relative_path: bool,
    pub exclude_node_modules: bool,
}

impl Default for RulesetConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            extension: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            relative_path: true,
            exclude_node_modules: true,
        }
    }
}

/// Compiled, immutable inclusion rules for one run.
#[derive(Debug, Clone)]
pub struct ExcludeRuleset {
    cwd: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    extension: Vec<String>,
    relative_path: bool,
    exclude_node_modules: bool,
}

impl ExcludeRuleset {
    /// Compile the rules. `cwd` must be absolute; it is the base for relative
    /// matching.
    pub fn new(cwd: impl Into<PathBuf>, config: RulesetConfig) -> Result<Self> {
        let cwd = normalize_lexically(&cwd.into());
        if !cwd.is_absolute() {
            return Err(CovmergeError::Config(format!(
                "working directory must be absolute: {}",
                cwd.display()
            )));
        }
        Ok(Self {
            cwd,
            include: compile_patterns(&config.include)?,
            exclude: compile_patterns(&config.exclude)?,
            extension: config.extension,
            relative_path: config.relative_path,
            exclude_node_modules: config.exclude_node_modules,
        })
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extension
    }

    /// Whether `filename` has one of the allowed extensions.
    #[must_use]
    pub fn has_allowed_extension(&self, filename: &str) -> bool {
        self.extension.iter().any(|ext| filename.ends_with(ext.as_str()))
    }

    /// Decide whether a file should count toward coverage. Relative names are
    /// resolved against the working directory.
    #[must_use]
    pub fn should_instrument(&self, filename: &str) -> bool {
        if !self.has_allowed_extension(filename) {
            return false;
        }

        let path = Path::new(filename);
        let absolute = if path.is_absolute() {
            normalize_lexically(path)
        } else {
            normalize_lexically(&self.cwd.join(path))
        };

        if self.exclude_node_modules && is_in_node_modules(&absolute) {
            return false;
        }

        let candidate = match absolute.strip_prefix(&self.cwd) {
            Ok(rel) => to_slash(rel),
            Err(_) if self.relative_path => return false,
            Err(_) => to_slash(&absolute),
        };
        self.matches(&candidate)
    }

    /// List files under `root` that pass the rules, relative to `root`.
    pub fn glob_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(CovmergeError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let prune_node_modules = self.exclude_node_modules;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                !(prune_node_modules && e.depth() > 0 && e.file_name() == NODE_MODULES)
            });

        let mut files = Vec::new();
        let mut errors = 0usize;
        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry under {}: {e}", root.display());
                    errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel_str = to_slash(rel);
            if self.has_allowed_extension(&rel_str) && self.matches(&rel_str) {
                files.push(rel.to_path_buf());
            }
        }
        if errors > 0 {
            tracing::warn!(
                "encountered {errors} errors while listing files under {}",
                root.display()
            );
        }
        Ok(files)
    }

    fn matches(&self, candidate: &str) -> bool {
        if !self.include.is_empty()
            && !self
                .include
                .iter()
                .any(|p| p.matches_with(candidate, MATCH_OPTIONS))
        {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|p| p.matches_with(candidate, MATCH_OPTIONS))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    let mut compiled = Vec::new();
    for raw in patterns {
        for expanded in expand_braces(raw.trim_start_matches("./")) {
            let mut variants = vec![expanded.clone()];
            if !expanded.ends_with("**") {
                variants.push(format!("{}/**", expanded.trim_end_matches('/')));
            }
            for variant in variants {
                let pattern = Pattern::new(&variant).map_err(|source| CovmergeError::Glob {
                    pattern: raw.clone(),
                    source,
                })?;
                compiled.push(pattern);
            }
        }
    }
    Ok(compiled)
}

/// Expand `{a,b}` alternatives, e.g. `test{,s}/**` into `test/**` and
/// `tests/**`. Unbalanced braces are left as-is.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (idx, ch) in pattern[open..].char_indices() {
        let idx = open + idx;
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alternative = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{alternative}{suffix}"))
        })
        .collect()
}

fn is_in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == NODE_MODULES))
}

/// Normalize a path to use forward slashes.
pub(crate) fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Resolve `.` and `..` components without touching the filesystem.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Express `path` relative to `base`, stepping out with `..` when it lies
/// outside. Both are normalized lexically first.
pub(crate) fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path = normalize_lexically(path);
    let base = normalize_lexically(base);
    let mut path_parts = path.components().peekable();
    let mut base_parts = base.components().peekable();
    while let (Some(a), Some(b)) = (path_parts.peek(), base_parts.peek()) {
        if a != b {
            break;
        }
        path_parts.next();
        base_parts.next();
    }

    let mut out = PathBuf::new();
    for _ in base_parts {
        out.push("..");
    }
    out.extend(path_parts);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset(config: RulesetConfig) -> ExcludeRuleset {
        ExcludeRuleset::new("/project", config).unwrap()
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("test{,s}/**"), vec!["test/**", "tests/**"]);
        assert_eq!(
            expand_braces("{a,b}.{js,ts}"),
            vec!["a.js", "a.ts", "b.js", "b.ts"]
        );
        assert_eq!(expand_braces("plain/**"), vec!["plain/**"]);
        assert_eq!(expand_braces("broken{a,b"), vec!["broken{a,b"]);
    }

    #[test]
    fn test_default_rules() {
        let rules = ruleset(RulesetConfig::default());
        assert!(rules.should_instrument("/project/src/lib.js"));
        assert!(rules.should_instrument("src/lib.ts"));
        assert!(!rules.should_instrument("/project/test/lib.js"));
        assert!(!rules.should_instrument("/project/src/lib.test.js"));
        assert!(!rules.should_instrument("/project/src/types.d.ts"));
        assert!(!rules.should_instrument("/project/coverage/tmp/x.js"));
        assert!(!rules.should_instrument("/project/src/readme.md"));
    }

    #[test]
    fn test_external_paths() {
        let rules = ruleset(RulesetConfig::default());
        assert!(!rules.should_instrument("/elsewhere/lib.js"));
        assert!(!rules.should_instrument("../elsewhere/lib.js"));

        let rules = ruleset(RulesetConfig {
            relative_path: false,
            ..RulesetConfig::default()
        });
        assert!(rules.should_instrument("/elsewhere/lib.js"));
    }

    #[test]
    fn test_node_modules() {
        let rules = ruleset(RulesetConfig::default());
        assert!(!rules.should_instrument("/project/node_modules/dep/index.js"));

        let rules = ruleset(RulesetConfig {
            exclude_node_modules: false,
            ..RulesetConfig::default()
        });
        assert!(rules.should_instrument("/project/node_modules/dep/index.js"));
    }

    #[test]
    fn test_include_restricts() {
        let rules = ruleset(RulesetConfig {
            include: vec!["src".to_string()],
            ..RulesetConfig::default()
        });
        assert!(rules.should_instrument("/project/src/deep/a.js"));
        assert!(!rules.should_instrument("/project/lib/a.js"));
    }

    #[test]
    fn test_exclude_without_slash_is_relative_to_cwd() {
        let rules = ruleset(RulesetConfig {
            exclude: vec!["*.config.js".to_string()],
            ..RulesetConfig::default()
        });
        assert!(!rules.should_instrument("/project/app.config.js"));
        assert!(rules.should_instrument("/project/src/app.config.js"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ExcludeRuleset::new(
            "/project",
            RulesetConfig {
                include: vec!["[".to_string()],
                ..RulesetConfig::default()
            },
        );
        assert!(matches!(result, Err(CovmergeError::Glob { .. })));
    }

    #[test]
    fn test_relative_cwd_rejected() {
        assert!(ExcludeRuleset::new("project", RulesetConfig::default()).is_err());
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d.js")),
            PathBuf::from("/a/c/d.js")
        );
    }

    #[test]
    fn test_relative_to() {
        let base = Path::new("/project");
        assert_eq!(relative_to(Path::new("/project/src/a.js"), base), PathBuf::from("src/a.js"));
        assert_eq!(relative_to(Path::new("/x.js"), base), PathBuf::from("../x.js"));
        assert_eq!(
            relative_to(Path::new("/projects/b.js"), base),
            PathBuf::from("../projects/b.js")
        );
        assert_eq!(
            relative_to(Path::new("/project/../other/c.js"), base),
            PathBuf::from("../other/c.js")
        );
    }

    #[test]
    fn test_glob_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("test")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        std::fs::write(root.join("src/a.js"), "a").unwrap();
        std::fs::write(root.join("src/b.md"), "b").unwrap();
        std::fs::write(root.join("test/a.js"), "t").unwrap();
        std::fs::write(root.join("node_modules/dep/index.js"), "d").unwrap();

        let rules = ExcludeRuleset::new(root, RulesetConfig::default()).unwrap();
        let files = rules.glob_files(root).unwrap();
        assert_eq!(files, vec![PathBuf::from("src/a.js")]);
    }
}
