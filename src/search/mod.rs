//! Search-index contract.
//!
//! Cited references live in the search index as documents whose list fields
//! (`document_fk`, `in`, `document_fk_au`, `document_fk_ta`) name the citing
//! documents, their collections, authors and journals. Citing documents point
//! back through `citation_fk`. These names are the external contract and are
//! reproduced exactly.
//!
//! The index caps the number of ids in one boolean query, so lookups go
//! through [`fetch_by_ids`], which splits the id list and unions the results.

mod memory;
mod query;
mod update;

pub use memory::MemorySearchIndex;
pub use query::{IdQuery, ResponseBody, SelectResponse};
pub use update::{BackReferenceUpdate, CitingDocumentPatch, DeleteCommand, DeleteQuery};

use crate::error::Result;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// A search-index document, cited reference or citing document.
///
/// Fields the merge does not touch are kept in `extra` and written back as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    /// Citing documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_fk: Vec<String>,
    /// Collections of the citing documents.
    #[serde(rename = "in", default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
    /// Citing authors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_fk_au: Option<Vec<String>>,
    /// Citing journal titles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_fk_ta: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "count_as_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_received: Option<String>,
    /// Back-references from a citing document to cited references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citation_fk: Vec<String>,
    /// Optimistic-concurrency stamp assigned by the index.
    #[serde(rename = "_version_", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SearchDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// The index stores counts as strings but older snapshots carry numbers.
fn count_as_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Count>::deserialize(deserializer)?.map(|count| match count {
        Count::Text(text) => text,
        Count::Number(n) => n.to_string(),
    }))
}

/// Operations the merge engine needs from a search index.
///
/// Mutations take `&self` so one index handle can be read by the engine while
/// a sink applies flushed batches to it.
pub trait SearchIndex {
    /// Documents whose id is in `query`. Unknown ids are not an error.
    fn select(&self, query: &IdQuery) -> Result<SelectResponse>;

    /// Replace whole documents.
    fn upsert(&self, documents: &[SearchDocument]) -> Result<()>;

    /// Rewrite back-references on citing documents.
    fn patch(&self, patches: &[CitingDocumentPatch]) -> Result<()>;

    fn delete(&self, commands: &[DeleteCommand]) -> Result<()>;

    /// Make every previous mutation visible.
    fn commit(&self) -> Result<()>;
}

/// Fetch the documents named by `ids`, at most `max_clauses` ids per query.
///
/// Duplicate ids are looked up once and each document appears once in the
/// result. Ids the index does not know are skipped.
pub fn fetch_by_ids<I: SearchIndex + ?Sized>(
    index: &I,
    ids: &[String],
    max_clauses: usize,
) -> Result<Vec<SearchDocument>> {
    let ids: Vec<&String> = ids.iter().unique().collect();
    let mut seen = HashSet::with_capacity(ids.len());
    let mut documents = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(max_clauses.max(1)) {
        let response = index.select(&IdQuery::new(chunk.iter().map(|id| id.as_str())))?;
        documents.extend(
            response
                .into_docs()
                .into_iter()
                .filter(|doc| seen.insert(doc.id.clone())),
        );
    }

    if documents.len() < ids.len() {
        tracing::debug!(
            requested = ids.len(),
            found = documents.len(),
            "some ids are missing from the search index"
        );
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_search_document_roundtrip_keeps_extra_fields() {
        let raw = json!({
            "id": "c1",
            "entity": "citation",
            "document_fk": ["d1"],
            "in": ["scl"],
            "ti": "Malária no Brasil",
            "_version_": 12
        });
        let doc: SearchDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(doc.collections, vec!["scl"]);
        assert_eq!(doc.version, Some(12));
        assert_eq!(doc.document_fk_au, None);
        assert_eq!(serde_json::to_value(&doc).unwrap(), raw);
    }

    #[test]
    fn test_fetch_by_ids_chunks_queries() {
        let index = MemorySearchIndex::from_documents(
            (0..2500).map(|i| SearchDocument::new(format!("c{i:04}"))),
        );
        let ids: Vec<String> = (0..2500).map(|i| format!("c{i:04}")).collect();

        let documents = fetch_by_ids(&index, &ids, 1000).unwrap();
        assert_eq!(index.select_count(), 3);
        assert_eq!(documents.len(), 2500);

        let unbounded = fetch_by_ids(&index, &ids, usize::MAX).unwrap();
        assert_eq!(index.select_count(), 4);
        let mut a: Vec<_> = documents.into_iter().map(|d| d.id).collect();
        let mut b: Vec<_> = unbounded.into_iter().map(|d| d.id).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fetch_by_ids_tolerates_missing_and_repeated() {
        let index = MemorySearchIndex::from_documents([
            SearchDocument::new("c1"),
            SearchDocument::new("c2"),
        ]);
        let ids = ["c2", "gone", "c1", "c2"].map(String::from);

        let documents = fetch_by_ids(&index, &ids, 1).unwrap();
        assert_eq!(index.select_count(), 3);
        let found: Vec<_> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(found, vec!["c2", "c1"]);
    }
}
