use super::SearchDocument;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A lookup of documents by id, rendered as `id:(a OR b OR c)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdQuery {
    ids: Vec<String>,
}

impl IdQuery {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Display for IdQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id:({})", self.ids.join(" OR "))
    }
}

impl FromStr for IdQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .trim()
            .strip_prefix("id:")
            .ok_or_else(|| Error::query(s, "expected an id field query"))?;

        let inner = match body.strip_prefix('(') {
            Some(rest) => rest
                .strip_suffix(')')
                .ok_or_else(|| Error::query(s, "unbalanced parenthesis"))?,
            None => body,
        };

        let ids: Vec<String> = inner
            .split(" OR ")
            .map(str::trim)
            .map(str::to_string)
            .collect();
        if ids.iter().any(String::is_empty) {
            return Err(Error::query(s, "empty id"));
        }
        Ok(Self { ids })
    }
}

/// Body of a select response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(rename = "numFound", default)]
    pub num_found: usize,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub docs: Vec<SearchDocument>,
}

/// Typed select response: `{"response": {"numFound": .., "docs": [..]}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectResponse {
    #[serde(default)]
    pub response: ResponseBody,
}

impl SelectResponse {
    pub fn from_docs(docs: Vec<SearchDocument>) -> Self {
        Self {
            response: ResponseBody {
                num_found: docs.len(),
                start: 0,
                docs,
            },
        }
    }

    /// Decode a raw select response body.
    pub fn decode(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn docs(&self) -> &[SearchDocument] {
        &self.response.docs
    }

    pub fn into_docs(self) -> Vec<SearchDocument> {
        self.response.docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_render() {
        let query = IdQuery::new(["S1-scl", "S2-arg"]);
        assert_eq!(query.to_string(), "id:(S1-scl OR S2-arg)");
        assert_eq!(IdQuery::new(["only"]).to_string(), "id:(only)");
    }

    #[rstest]
    #[case("id:(a OR b OR c)", &["a", "b", "c"])]
    #[case("id:(S0102-311X200100010000200001-scl)", &["S0102-311X200100010000200001-scl"])]
    #[case("id:single", &["single"])]
    #[case("  id:( a OR  b )  ", &["a", "b"])]
    fn test_parse(#[case] input: &str, #[case] expected: &[&str]) {
        let query: IdQuery = input.parse().unwrap();
        assert_eq!(query.ids(), expected);
    }

    #[rstest]
    #[case("title:(a)")]
    #[case("id:(a OR b")]
    #[case("id:()")]
    #[case("id:(a OR  OR b)")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(matches!(input.parse::<IdQuery>(), Err(Error::Query { .. })));
    }

    #[test]
    fn test_decode_select_response() {
        let body = r#"{
            "responseHeader": {"status": 0, "QTime": 3},
            "response": {"numFound": 2, "start": 0, "docs": [
                {"id": "c1", "document_fk": ["d1"], "in": ["scl"], "total_received": "1", "_version_": 1700000000000000000},
                {"id": "c2", "document_fk": ["d2"], "in": ["arg"], "total_received": 1, "entity": "citation"}
            ]}
        }"#;

        let response = SelectResponse::decode(body).unwrap();
        assert_eq!(response.response.num_found, 2);
        assert_eq!(response.docs()[0].version, Some(1_700_000_000_000_000_000));
        assert_eq!(response.docs()[1].total_received.as_deref(), Some("1"));
        assert_eq!(
            response.docs()[1].extra.get("entity"),
            Some(&serde_json::json!("citation"))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            SelectResponse::decode("{'response': None}"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_decode_missing_response_is_empty() {
        let response = SelectResponse::decode("{}").unwrap();
        assert!(response.docs().is_empty());
    }
}
