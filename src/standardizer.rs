//! Journal-title standardization lookup.
//!
//! Records are produced by an external standardization job and keyed by the
//! citation full id. A missing record is normal and simply means the raw
//! source field is used for the journal-title key.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

/// Normalized journal titles attached to one citation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardizedRecord {
    /// Citation full id.
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "official-journal-title", default)]
    pub official_journal_title: Vec<String>,
    #[serde(rename = "official-abbreviated-journal-title", default)]
    pub official_abbreviated_journal_title: Vec<String>,
}

/// Lookup of standardized records by citation full id.
pub trait Standardizer: Send + Sync {
    fn lookup(&self, citation_full_id: &str) -> Option<&StandardizedRecord>;
}

/// Standardizer held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStandardizer {
    records: HashMap<String, StandardizedRecord>,
}

impl MemoryStandardizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: StandardizedRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load records from a JSON-lines file, one record per line. Blank lines are skipped.
    pub fn from_json_lines(path: &Path) -> Result<Self> {
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        let mut standardizer = Self::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            standardizer.insert(serde_json::from_str(&line)?);
        }
        tracing::info!(
            records = standardizer.len(),
            path = %path.display(),
            "loaded standardized journal titles"
        );
        Ok(standardizer)
    }
}

impl FromIterator<StandardizedRecord> for MemoryStandardizer {
    fn from_iter<T: IntoIterator<Item = StandardizedRecord>>(iter: T) -> Self {
        let mut standardizer = Self::new();
        for record in iter {
            standardizer.insert(record);
        }
        standardizer
    }
}

impl Standardizer for MemoryStandardizer {
    fn lookup(&self, citation_full_id: &str) -> Option<&StandardizedRecord> {
        self.records.get(citation_full_id)
    }
}
