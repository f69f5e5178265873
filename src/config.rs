//! Run configuration.
//!
//! Loaded once at startup from an optional TOML file, overridden by command
//! line flags, validated, then passed by reference into each component. Every
//! key has a default, so an empty file is a valid configuration.
//!
//! # Example
//!
//! ```
//! use citemerge::Config;
//! use citemerge::keys::SchemeTag;
//!
//! let config = Config::from_toml_str(r#"
//! schemes = ["article", "book"]
//! upsert_batch_size = 500
//! "#).unwrap();
//!
//! assert_eq!(config.schemes, vec![SchemeTag::Article, SchemeTag::Book]);
//! assert_eq!(config.upsert_batch_size, 500);
//! assert_eq!(config.max_query_clauses, 1000);
//! ```

use crate::error::{Error, Result};
use crate::keys::SchemeTag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Documents per key-generation wave.
pub const DEFAULT_DOCUMENT_CHUNK_SIZE: usize = 2000;
/// Pending upserts before a dedup-store flush.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 1000;
/// Ids per search-index query; the backend rejects larger boolean queries.
pub const DEFAULT_MAX_QUERY_CLAUSES: usize = 1000;
/// Merged primaries per output batch.
pub const DEFAULT_MERGE_FLUSH_THRESHOLD: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Schemes keyed and merged by this run.
    pub schemes: Vec<SchemeTag>,
    pub document_chunk_size: usize,
    pub upsert_batch_size: usize,
    pub max_query_clauses: usize,
    pub merge_flush_threshold: usize,
    /// SQLite dedup store.
    pub store_path: PathBuf,
    /// Directory receiving merge artifacts.
    pub output_dir: PathBuf,
    /// Apply merge batches to the search index as well as writing artifacts.
    pub apply_to_index: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schemes: SchemeTag::ALL.to_vec(),
            document_chunk_size: DEFAULT_DOCUMENT_CHUNK_SIZE,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            max_query_clauses: DEFAULT_MAX_QUERY_CLAUSES,
            merge_flush_threshold: DEFAULT_MERGE_FLUSH_THRESHOLD,
            store_path: PathBuf::from("dedup.sqlite"),
            output_dir: PathBuf::from("merges"),
            apply_to_index: false,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
                tracing::debug!(path = %path.display(), ?config, "loaded configuration");
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Check sizes and scheme selection.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("document_chunk_size", self.document_chunk_size),
            ("upsert_batch_size", self.upsert_batch_size),
            ("max_query_clauses", self.max_query_clauses),
            ("merge_flush_threshold", self.merge_flush_threshold),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be greater than 0")));
        }
        if self.schemes.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one scheme must be selected".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
            schemes = ["chapter"]
            document_chunk_size = 10
            upsert_batch_size = 20
            max_query_clauses = 30
            merge_flush_threshold = 40
            store_path = "/tmp/keys.sqlite"
            output_dir = "/tmp/out"
            apply_to_index = true
            "#,
        )
        .unwrap();

        assert_eq!(config.schemes, vec![SchemeTag::Chapter]);
        assert_eq!(config.document_chunk_size, 10);
        assert_eq!(config.merge_flush_threshold, 40);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.apply_to_index);
    }

    #[rstest]
    #[case("upsert_batch_size = 0", "upsert_batch_size")]
    #[case("max_query_clauses = 0", "max_query_clauses")]
    #[case("schemes = []", "scheme")]
    fn test_invalid_values(#[case] input: &str, #[case] mentions: &str) {
        let error = Config::from_toml_str(input).unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
        assert!(error.to_string().contains(mentions));
    }

    #[rstest]
    #[case("schemes = [\"journal\"]")]
    #[case("chunk = 3")]
    #[case("upsert_batch_size = \"many\"")]
    fn test_unparseable(#[case] input: &str) {
        assert!(matches!(
            Config::from_toml_str(input),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_without_path() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }
}
