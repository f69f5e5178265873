//! Deduplication of cited references and merging of their search-index entries.
//!
//! `citemerge` turns noisy citation metadata into exact-match keys, clusters
//! citations that share a key in an incrementally maintained dedup index, and
//! merges the search-index documents of each cluster into one canonical entry,
//! rewriting the back-references held by citing documents.
//!
//! # Features
//!
//! - `parallel` - Generate keys for document chunks on a rayon pool (enabled by default)
//! - `sqlite` - SQLite-backed dedup store and the `citemerge` binary (enabled by default)
//! - `regex` / `lite` - Choose the regex engine (`regex` by default)
//!
//! # Pipeline
//!
//! 1. [`canonical`] cleans raw fields (diacritics, case, trailing periods,
//!    implausible dates, noisy author names).
//! 2. [`keys`] selects the key schemes available for each citation and
//!    fingerprints the required fields. A scheme yields a key only when every
//!    required field survived cleaning.
//! 3. [`index`] accumulates `(scheme, fingerprint)` upserts and flushes them in
//!    bounded batches into a [`index::DedupStore`] with set-union semantics.
//! 4. [`merge`] reads clusters with more than one member, merges their search
//!    documents into a primary, and stages upserts, back-reference patches and
//!    deletions in durable batches.
//!
//! # Key generation
//!
//! ```rust
//! use citemerge::keys::{KeyGenerator, SchemeTag};
//! use citemerge::standardizer::MemoryStandardizer;
//! use citemerge::{Citation, CitingDocument, PersonName, PublicationType};
//!
//! let document = CitingDocument {
//!     id: "S0102-311X2001000100002".to_string(),
//!     collection: "scl".to_string(),
//!     citations: vec![Citation {
//!         index: 1,
//!         publication_type: PublicationType::Article,
//!         first_author: Some(PersonName::new("Silva", "José")),
//!         title: Some("Malária no Brasil.".to_string()),
//!         source: Some("Rev. Saúde Pública".to_string()),
//!         publication_date: Some("1999-05".to_string()),
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//!
//! let standardizer = MemoryStandardizer::new();
//! let generator = KeyGenerator::new(&[SchemeTag::Article], &standardizer);
//! let keys = generator.keys_for_document(&document);
//!
//! assert_eq!(keys.len(), 1);
//! assert_eq!(keys[0].citation_full_id, "S0102-311X200100010000200001-scl");
//! ```
//!
//! # Error Handling
//!
//! Cleaning never fails. Store, search-index, file and configuration failures
//! are reported through [`Error`]; a failed merge flush is wrapped in
//! [`Error::Flush`] with the batch number so the run can be restarted from the
//! last confirmed batch.

use serde::{Deserialize, Serialize};

pub mod canonical;
pub mod config;
pub mod error;
pub mod generate;
pub mod index;
pub mod keys;
pub mod merge;
pub mod search;
pub mod source;
pub mod standardizer;

// Reexports
pub use config::Config;
pub use error::{Error, Result};

mod regex;

/// Publication type of a cited reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationType {
    #[default]
    Article,
    Book,
    Chapter,
    /// Any other type (thesis, link, conference...). Never keyed.
    #[serde(other)]
    Other,
}

impl PublicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationType::Article => "article",
            PublicationType::Book => "book",
            PublicationType::Chapter => "chapter",
            PublicationType::Other => "other",
        }
    }
}

impl std::fmt::Display for PublicationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person name as recorded in a reference list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub given_names: Option<String>,
}

impl PersonName {
    pub fn new(surname: impl Into<String>, given_names: impl Into<String>) -> Self {
        Self {
            surname: Some(surname.into()),
            given_names: Some(given_names.into()),
        }
    }
}

/// A cited reference extracted from a citing document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Citation {
    /// Position of the reference in the citing document's reference list.
    pub index: u32,
    pub publication_type: PublicationType,
    /// Explicit first author; falls back to the first analytic, then monographic, author.
    pub first_author: Option<PersonName>,
    /// Authors of the part (article, chapter).
    pub analytic_authors: Vec<PersonName>,
    /// Authors of the whole (book).
    pub monographic_authors: Vec<PersonName>,
    pub title: Option<String>,
    pub chapter_title: Option<String>,
    /// Journal name for articles, book title for books.
    pub source: Option<String>,
    pub publisher: Option<String>,
    pub publisher_address: Option<String>,
    pub publication_date: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub start_page: Option<String>,
}

impl Citation {
    pub fn first_author(&self) -> Option<&PersonName> {
        self.first_author
            .as_ref()
            .or_else(|| self.analytic_authors.first())
            .or_else(|| self.monographic_authors.first())
    }

    /// Whether this reference is a chapter of a book. Either book type only
    /// counts as a chapter when it carries a chapter title.
    pub fn is_chapter(&self) -> bool {
        matches!(
            self.publication_type,
            PublicationType::Book | PublicationType::Chapter
        ) && self
            .chapter_title
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// A document whose reference list is being deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitingDocument {
    /// Document identifier (PID), unique within its collection.
    pub id: String,
    /// Acronym of the collection contributing the document.
    pub collection: String,
    /// Date the document was last processed upstream; used by date filters.
    #[serde(default)]
    pub processing_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl CitingDocument {
    /// Identifier of the citing document as stored in the search index.
    pub fn full_id(&self) -> String {
        format!("{}-{}", self.id, self.collection)
    }

    /// Stable identifier of one of this document's citations:
    /// document id, five-digit sequence number, collection acronym.
    pub fn citation_full_id(&self, citation: &Citation) -> String {
        format!("{}{:05}-{}", self.id, citation.index, self.collection)
    }
}
