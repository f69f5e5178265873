//! Error types for key generation and merge runs.
//!
//! Canonicalization never fails: bad field values degrade to "absent". The
//! errors here cover the collaborators around the core (stores, search index,
//! artifact files, configuration) and are surfaced to the caller so a run can
//! be restarted from the last confirmed flush.

use thiserror::Error;

/// Top-level error type for citemerge operations.
#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlite")]
    #[error("dedup store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unable to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed query \"{query}\": {reason}")]
    Query { query: String, reason: String },

    #[error("search index error: {0}")]
    Search(String),

    #[error("failed to flush merge batch {batch}: {source}")]
    Flush {
        batch: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error raised while persisting merge batch `batch`.
    pub fn flush(batch: usize, source: Error) -> Self {
        Error::Flush {
            batch,
            source: Box::new(source),
        }
    }

    /// Create a query error.
    pub fn query(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Query {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
