use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the benchmark orchestrator
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid benchmark request: {0}")]
    InvalidRequest(String),

    #[error("Request filters selected no runs: {0}")]
    EmptyExpansion(String),

    #[error("Invalid task catalog: {0}")]
    CatalogError(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigError(String),

    #[error("No successful runs for {task}/{model}/{dataset} ({failures} failed)")]
    NoSuccessfulRuns {
        task: String,
        model: String,
        dataset: String,
        failures: usize,
    },

    #[error("Failed to publish {path}: {reason}")]
    PublishError { path: PathBuf, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for benchmark operations
pub type BenchResult<T> = Result<T, BenchError>;

/// Utility functions for working with BenchError
pub mod util {
    use super::*;
    use std::fmt;
    use std::path::Path;

    /// Check if a file exists, returning a FileNotFound error if it doesn't
    pub fn ensure_file_exists<P: AsRef<Path>>(path: P) -> BenchResult<()> {
        let path_ref = path.as_ref();
        if !path_ref.is_file() {
            return Err(BenchError::FileNotFound(path_ref.to_path_buf()));
        }
        Ok(())
    }

    /// Wrap an error raised while publishing `path`
    pub fn to_publish_error<E: fmt::Display>(e: E, path: &Path) -> BenchError {
        BenchError::PublishError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for BenchError {
    fn from(err: anyhow::Error) -> Self {
        BenchError::Other(err.to_string())
    }
}

impl From<csv::Error> for BenchError {
    fn from(err: csv::Error) -> Self {
        BenchError::Other(format!("CSV error: {}", err))
    }
}
