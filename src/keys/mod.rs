//! Dedup key generation.
//!
//! For one citation the generator derives its [`CanonicalFields`] and emits a
//! [`KeyRecord`] for every active scheme whose required fields are all present.
//! Schemes are independent: an article with volume and issue lands in the
//! `article`, `article_volume` and `article_issue` clusters at once, and a
//! chapter is keyed under `chapter` whether or not its `book` key succeeded.
//!
//! # Example
//!
//! ```
//! use citemerge::keys::{KeyGenerator, SchemeTag};
//! use citemerge::standardizer::MemoryStandardizer;
//! use citemerge::{Citation, CitingDocument, PersonName, PublicationType};
//!
//! let document = CitingDocument {
//!     id: "S1413-81232010000100001".to_string(),
//!     collection: "scl".to_string(),
//!     citations: vec![Citation {
//!         index: 4,
//!         publication_type: PublicationType::Book,
//!         first_author: Some(PersonName::new("Freire", "Paulo")),
//!         source: Some("Pedagogia do oprimido".to_string()),
//!         publisher: Some("Paz e Terra".to_string()),
//!         publisher_address: Some("Rio de Janeiro".to_string()),
//!         publication_date: Some("1970".to_string()),
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//!
//! let standardizer = MemoryStandardizer::new();
//! let generator = KeyGenerator::new(&SchemeTag::ALL, &standardizer);
//! let keys = generator.keys_for_document(&document);
//!
//! assert_eq!(keys.len(), 1);
//! assert_eq!(keys[0].scheme, SchemeTag::Book);
//! ```

mod scheme;

pub use scheme::{Fingerprint, KeyScheme, SchemeTag};

use crate::canonical::{
    CanonicalFields, Field, clean_author_name, clean_journal_title, clean_key,
    clean_publication_date,
};
use crate::standardizer::Standardizer;
use crate::{Citation, CitingDocument, PublicationType};
use serde::{Deserialize, Serialize};

/// One dedup-index upsert produced for a citation under one scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub scheme: SchemeTag,
    pub fingerprint: Fingerprint,
    /// Search-index id of the citing document.
    pub citing_doc_id: String,
    pub citation_full_id: String,
    /// Exactly the values the fingerprint was computed from.
    pub fields: CanonicalFields,
}

/// Produces [`KeyRecord`]s for citations under a fixed set of active schemes.
pub struct KeyGenerator<'a> {
    schemes: Vec<SchemeTag>,
    standardizer: &'a dyn Standardizer,
}

impl<'a> KeyGenerator<'a> {
    pub fn new(schemes: &[SchemeTag], standardizer: &'a dyn Standardizer) -> Self {
        let mut schemes = schemes.to_vec();
        schemes.sort();
        schemes.dedup();
        Self {
            schemes,
            standardizer,
        }
    }

    pub fn schemes(&self) -> &[SchemeTag] {
        &self.schemes
    }

    /// Keys for every citation of `document`.
    pub fn keys_for_document(&self, document: &CitingDocument) -> Vec<KeyRecord> {
        document
            .citations
            .iter()
            .flat_map(|citation| self.keys_for(document, citation))
            .collect()
    }

    /// Keys for one citation of `document`.
    pub fn keys_for(&self, document: &CitingDocument, citation: &Citation) -> Vec<KeyRecord> {
        let candidates = candidate_schemes(citation);
        if candidates.is_empty() {
            return Vec::new();
        }

        let citation_full_id = document.citation_full_id(citation);
        let fields = self.canonical_fields(citation, &citation_full_id);
        let citing_doc_id = document.full_id();

        candidates
            .iter()
            .filter(|tag| self.schemes.contains(tag))
            .filter_map(|tag| {
                let (subset, fingerprint) = tag.scheme().fingerprint(&fields)?;
                Some(KeyRecord {
                    scheme: *tag,
                    fingerprint,
                    citing_doc_id: citing_doc_id.clone(),
                    citation_full_id: citation_full_id.clone(),
                    fields: subset,
                })
            })
            .collect()
    }

    /// Clean every field relevant to the citation's publication type.
    pub fn canonical_fields(&self, citation: &Citation, citation_full_id: &str) -> CanonicalFields {
        let mut fields = CanonicalFields::new();
        fields.insert_opt(
            Field::PublicationDate,
            clean_publication_date(citation.publication_date.as_deref()),
        );

        match citation.publication_type {
            PublicationType::Article => {
                fields.insert_opt(
                    Field::FirstAuthor,
                    citation.first_author().and_then(clean_author_name),
                );
                fields.insert_opt(Field::Title, clean_key(citation.title.as_deref()));
                fields.insert_opt(
                    Field::JournalTitle,
                    clean_journal_title(
                        self.standardizer.lookup(citation_full_id),
                        citation.source.as_deref(),
                    ),
                );
                fields.insert_opt(Field::Volume, clean_key(citation.volume.as_deref()));
                fields.insert_opt(Field::Issue, clean_key(citation.issue.as_deref()));
                fields.insert_opt(Field::StartPage, clean_key(citation.start_page.as_deref()));
            }
            PublicationType::Book | PublicationType::Chapter => {
                if citation.is_chapter() {
                    fields.insert_opt(
                        Field::ChapterFirstAuthor,
                        citation.analytic_authors.first().and_then(clean_author_name),
                    );
                    fields.insert_opt(
                        Field::FirstAuthor,
                        citation.monographic_authors.first().and_then(clean_author_name),
                    );
                    fields.insert_opt(
                        Field::ChapterTitle,
                        clean_key(citation.chapter_title.as_deref()),
                    );
                } else {
                    fields.insert_opt(
                        Field::FirstAuthor,
                        citation.first_author().and_then(clean_author_name),
                    );
                }
                fields.insert_opt(Field::Source, clean_key(citation.source.as_deref()));
                fields.insert_opt(Field::Publisher, clean_key(citation.publisher.as_deref()));
                fields.insert_opt(
                    Field::PublisherAddress,
                    clean_key(citation.publisher_address.as_deref()),
                );
            }
            PublicationType::Other => {}
        }

        fields
    }
}

/// Schemes a citation may contribute to, before checking field availability.
fn candidate_schemes(citation: &Citation) -> &'static [SchemeTag] {
    match citation.publication_type {
        PublicationType::Article => &[
            SchemeTag::Article,
            SchemeTag::ArticleVolume,
            SchemeTag::ArticleIssue,
            SchemeTag::ArticleStartPage,
        ],
        PublicationType::Book | PublicationType::Chapter if citation.is_chapter() => {
            &[SchemeTag::Book, SchemeTag::Chapter]
        }
        PublicationType::Book | PublicationType::Chapter => &[SchemeTag::Book],
        PublicationType::Other => &[],
    }
}
