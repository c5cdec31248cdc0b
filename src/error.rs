use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovmergeError {
    #[error("I/O error: {source} (path: {})", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Cannot convert '{0}' to a file path")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Converter '{backend}' is not available. {remediation}")]
    ConverterUnavailable {
        backend: String,
        remediation: String,
    },

    #[error("Unknown reporter: '{0}'. Supported: text, text-summary, json-summary, json")]
    UnknownReporter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CovmergeError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CovmergeError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CovmergeError>;
