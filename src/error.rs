use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatasetError {
    #[error("unknown dataset: {0}")]
    #[diagnostic(help("run `mtdl list` to see registered datasets"))]
    UnknownDataset(String),

    #[error("cannot resolve {dataset_id}: {reason}")]
    Resolution { dataset_id: String, reason: String },

    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        message: String,
        retryable: bool,
    },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("integrity check failed for {url}: {reason}")]
    Integrity { url: String, reason: String },

    #[error("failed to extract {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("cache index is corrupt: {0}")]
    CacheCorruption(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download aborted")]
    Aborted,
}

impl DatasetError {
    pub fn resolution(dataset_id: &str, reason: impl Into<String>) -> Self {
        DatasetError::Resolution {
            dataset_id: dataset_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DatasetError::Network { retryable, .. } => *retryable,
            DatasetError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Errors caused by the shape of a request. These are raised before any
    /// transfer starts instead of being folded into a manifest.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            DatasetError::UnknownDataset(_) | DatasetError::Resolution { .. }
        )
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            DatasetError::Network { url, .. }
            | DatasetError::HttpStatus { url, .. }
            | DatasetError::Integrity { url, .. } => Some(url),
            _ => None,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}
