//! Options for a run, loadable from a JSON config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::check::Thresholds;
use crate::convert::LINES_CONVERTER;
use crate::error::{CovmergeError, Result};
use crate::exclude::{RulesetConfig, DEFAULT_EXCLUDE, DEFAULT_EXTENSIONS};
use crate::model::Metric;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = ".covmergerc.json";

/// How a percentage compares with its watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

/// `[low, high]` bounds per metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Watermarks {
    pub statements: [f64; 2],
    pub functions: [f64; 2],
    pub branches: [f64; 2],
    pub lines: [f64; 2],
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            statements: [50.0, 80.0],
            functions: [50.0, 80.0],
            branches: [50.0, 80.0],
            lines: [50.0, 80.0],
        }
    }
}

impl Watermarks {
    #[must_use]
    pub fn get(&self, metric: Metric) -> [f64; 2] {
        match metric {
            Metric::Lines => self.lines,
            Metric::Functions => self.functions,
            Metric::Branches => self.branches,
            Metric::Statements => self.statements,
        }
    }

    #[must_use]
    pub fn classify(&self, metric: Metric, pct: f64) -> Level {
        let [low, high] = self.get(metric);
        if pct < low {
            Level::Low
        } else if pct >= high {
            Level::High
        } else {
            Level::Medium
        }
    }
}

/// Everything a run needs to know. Unset keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReportOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub extension: Vec<String>,
    pub reporter: Vec<String>,
    pub reports_dir: PathBuf,
    pub temp_directory: PathBuf,
    pub watermarks: Watermarks,
    /// Base directory for resolving script paths before conversion.
    pub resolve: Option<PathBuf>,
    pub omit_relative: bool,
    /// Length of the module wrapper the runtime prepends to every script.
    pub wrapper_length: u64,
    /// Also report files that no process loaded.
    pub all: bool,
    /// Roots to search in `all` mode. Defaults to the working directory.
    pub src: Vec<PathBuf>,
    pub allow_external: bool,
    pub skip_full: bool,
    pub exclude_node_modules: bool,
    pub exclude_after_remap: bool,
    /// Fold snapshot files one at a time instead of loading them all.
    pub merge_async: bool,
    pub per_file: bool,
    pub check_coverage: bool,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub converter: String,
    #[serde(skip)]
    pub cwd: Option<PathBuf>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            extension: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            reporter: vec!["text".to_string()],
            reports_dir: PathBuf::from("coverage"),
            temp_directory: PathBuf::from("coverage/tmp"),
            watermarks: Watermarks::default(),
            resolve: None,
            omit_relative: true,
            wrapper_length: 0,
            all: false,
            src: Vec::new(),
            allow_external: false,
            skip_full: false,
            exclude_node_modules: true,
            exclude_after_remap: false,
            merge_async: false,
            per_file: false,
            check_coverage: false,
            thresholds: Thresholds::default(),
            converter: LINES_CONVERTER.to_string(),
            cwd: None,
        }
    }
}

impl ReportOptions {
    /// Parse options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| CovmergeError::io(path, e))?;
        serde_json::from_slice(&content)
            .map_err(|e| CovmergeError::Config(format!("{}: {e}", path.display())))
    }

    /// Load options for a run in `cwd`: from `explicit` if given, else from
    /// [`DEFAULT_CONFIG_FILE`] when it exists, else defaults.
    pub fn load(cwd: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut options = match explicit {
            Some(path) => Self::from_file(&cwd.join(path))?,
            None => {
                let default = cwd.join(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    tracing::debug!("using config {}", default.display());
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        options.cwd = Some(cwd.to_path_buf());
        Ok(options)
    }

    /// The working directory of the run.
    pub fn cwd(&self) -> Result<PathBuf> {
        match &self.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => std::env::current_dir().map_err(|e| CovmergeError::io(".", e)),
        }
    }

    /// Resolve a configured path against the working directory.
    pub fn resolve_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.cwd()?.join(path))
    }

    pub fn temp_dir(&self) -> Result<PathBuf> {
        self.resolve_path(&self.temp_directory)
    }

    pub fn reports_dir(&self) -> Result<PathBuf> {
        self.resolve_path(&self.reports_dir)
    }

    /// Roots searched for never-loaded files.
    pub fn roots(&self) -> Result<Vec<PathBuf>> {
        let cwd = self.cwd()?;
        if self.src.is_empty() {
            Ok(vec![cwd])
        } else {
            Ok(self.src.iter().map(|src| cwd.join(src)).collect())
        }
    }

    #[must_use]
    pub fn ruleset_config(&self) -> RulesetConfig {
        RulesetConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            extension: self.extension.clone(),
            relative_path: !self.allow_external,
            exclude_node_modules: self.exclude_node_modules,
        }
    }
}
