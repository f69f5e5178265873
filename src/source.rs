//! Citing-document sources.
//!
//! The core only reads citing documents. [`JsonLinesSource`] streams them from
//! a file with one JSON [`CitingDocument`] per line.

use crate::CitingDocument;
use crate::error::Result;
use chrono::NaiveDate;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Selection of citing documents by processing date and id range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Keep documents processed on or after this day.
    pub from_date: Option<NaiveDate>,
    /// Keep documents processed on or before this day.
    pub until_date: Option<NaiveDate>,
    /// Keep documents whose id is `>=` this value.
    pub from_id: Option<String>,
    /// Keep documents whose id is `<=` this value.
    pub until_id: Option<String>,
}

impl DocumentFilter {
    /// Whether `document` passes the filter. Undated documents fail any date bound.
    pub fn matches(&self, document: &CitingDocument) -> bool {
        let date_ok = match (self.from_date, self.until_date) {
            (None, None) => true,
            (from, until) => document.processing_date.is_some_and(|date| {
                from.is_none_or(|f| date >= f) && until.is_none_or(|u| date <= u)
            }),
        };
        date_ok
            && self
                .from_id
                .as_deref()
                .is_none_or(|from| document.id.as_str() >= from)
            && self
                .until_id
                .as_deref()
                .is_none_or(|until| document.id.as_str() <= until)
    }
}

/// A store of citing documents.
pub trait DocumentSource {
    /// Stream documents accepted by `filter`.
    fn documents<'a>(
        &'a self,
        filter: &'a DocumentFilter,
    ) -> Result<Box<dyn Iterator<Item = Result<CitingDocument>> + 'a>>;
}

/// Citing documents stored as JSON lines.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DocumentSource for JsonLinesSource {
    fn documents<'a>(
        &'a self,
        filter: &'a DocumentFilter,
    ) -> Result<Box<dyn Iterator<Item = Result<CitingDocument>> + 'a>> {
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let iter = reader
            .lines()
            .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .map(|line| -> Result<CitingDocument> { Ok(serde_json::from_str(&line?)?) })
            .filter(move |doc| doc.as_ref().map_or(true, |d| filter.matches(d)));
        Ok(Box::new(iter))
    }
}

/// Documents held in memory.
impl DocumentSource for Vec<CitingDocument> {
    fn documents<'a>(
        &'a self,
        filter: &'a DocumentFilter,
    ) -> Result<Box<dyn Iterator<Item = Result<CitingDocument>> + 'a>> {
        Ok(Box::new(
            self.iter()
                .filter(move |d| filter.matches(d))
                .cloned()
                .map(Ok),
        ))
    }
}
