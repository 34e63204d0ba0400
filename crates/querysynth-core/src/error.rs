//! Error types shared across the library.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid query template for cardinality {cardinality}: {reason}")]
    InvalidTemplate { cardinality: u64, reason: String },
    #[error("invalid time range `{value}`: expected whole seconds or a duration like `30m`")]
    InvalidTimeRange { value: String },
    #[error("invalid constant label `{0}` (expected key=value)")]
    InvalidLabel(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
