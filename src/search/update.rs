use super::IdQuery;
use serde::{Deserialize, Serialize};

/// Field-level operation on a citing document's back-references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackReferenceUpdate {
    /// Ids removed from the field if present.
    pub remove: Vec<String>,
    /// Id added unless already present.
    #[serde(rename = "add-distinct")]
    pub add_distinct: String,
}

/// Atomic update rewriting `citation_fk` on one citing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitingDocumentPatch {
    pub entity: String,
    pub id: String,
    pub citation_fk: BackReferenceUpdate,
}

impl CitingDocumentPatch {
    pub const ENTITY: &'static str = "document";

    pub fn new(id: impl Into<String>, remove: Vec<String>, primary: impl Into<String>) -> Self {
        Self {
            entity: Self::ENTITY.to_string(),
            id: id.into(),
            citation_fk: BackReferenceUpdate {
                remove,
                add_distinct: primary.into(),
            },
        }
    }

    /// Apply the update to a list of back-references.
    pub fn apply_to(&self, references: &mut Vec<String>) {
        references.retain(|r| !self.citation_fk.remove.contains(r));
        if !references.contains(&self.citation_fk.add_distinct) {
            references.push(self.citation_fk.add_distinct.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteQuery {
    pub query: String,
}

/// Delete-by-query command: `{"delete": {"query": "id:(a OR b)"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCommand {
    pub delete: DeleteQuery,
}

impl DeleteCommand {
    pub fn new(query: &IdQuery) -> Self {
        Self {
            delete: DeleteQuery {
                query: query.to_string(),
            },
        }
    }

    /// One command per `max_clauses` ids.
    pub fn chunked(ids: &[String], max_clauses: usize) -> Vec<Self> {
        ids.chunks(max_clauses.max(1))
            .map(|chunk| Self::new(&IdQuery::new(chunk.iter().cloned())))
            .collect()
    }
}
