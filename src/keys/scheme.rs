//! Key schemes and fingerprints.

use crate::canonical::{CanonicalFields, Field};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

const ARTICLE_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Title,
    Field::JournalTitle,
];

const ARTICLE_VOLUME_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Title,
    Field::JournalTitle,
    Field::Volume,
];

const ARTICLE_ISSUE_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Title,
    Field::JournalTitle,
    Field::Issue,
];

const ARTICLE_START_PAGE_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Title,
    Field::JournalTitle,
    Field::StartPage,
];

const BOOK_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Source,
    Field::Publisher,
    Field::PublisherAddress,
];

const CHAPTER_FIELDS: &[Field] = &[
    Field::PublicationDate,
    Field::FirstAuthor,
    Field::Source,
    Field::Publisher,
    Field::PublisherAddress,
    Field::ChapterTitle,
    Field::ChapterFirstAuthor,
];

/// Name of a clustering criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeTag {
    Article,
    ArticleVolume,
    ArticleIssue,
    ArticleStartPage,
    Book,
    Chapter,
}

impl SchemeTag {
    pub const ALL: [SchemeTag; 6] = [
        SchemeTag::Article,
        SchemeTag::ArticleVolume,
        SchemeTag::ArticleIssue,
        SchemeTag::ArticleStartPage,
        SchemeTag::Book,
        SchemeTag::Chapter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemeTag::Article => "article",
            SchemeTag::ArticleVolume => "article_volume",
            SchemeTag::ArticleIssue => "article_issue",
            SchemeTag::ArticleStartPage => "article_start_page",
            SchemeTag::Book => "book",
            SchemeTag::Chapter => "chapter",
        }
    }

    /// The scheme definition behind this tag.
    pub fn scheme(self) -> KeyScheme {
        let fields = match self {
            SchemeTag::Article => ARTICLE_FIELDS,
            SchemeTag::ArticleVolume => ARTICLE_VOLUME_FIELDS,
            SchemeTag::ArticleIssue => ARTICLE_ISSUE_FIELDS,
            SchemeTag::ArticleStartPage => ARTICLE_START_PAGE_FIELDS,
            SchemeTag::Book => BOOK_FIELDS,
            SchemeTag::Chapter => CHAPTER_FIELDS,
        };
        KeyScheme { tag: self, fields }
    }

    /// Whether this scheme clusters article references.
    pub fn is_article(&self) -> bool {
        matches!(
            self,
            SchemeTag::Article
                | SchemeTag::ArticleVolume
                | SchemeTag::ArticleIssue
                | SchemeTag::ArticleStartPage
        )
    }
}

impl std::fmt::Display for SchemeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemeTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown scheme \"{s}\" (expected one of: {})",
                    itertools::join(SchemeTag::ALL.iter().map(SchemeTag::as_str), ", ")
                )
            })
    }
}

/// An ordered list of required canonical fields under a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyScheme {
    pub tag: SchemeTag,
    pub fields: &'static [Field],
}

impl KeyScheme {
    /// Fingerprint `fields` under this scheme.
    ///
    /// Returns the subset of values used together with the fingerprint, or
    /// `None` when any required field is absent.
    pub fn fingerprint(&self, fields: &CanonicalFields) -> Option<(CanonicalFields, Fingerprint)> {
        let subset = fields.select(self.fields)?;

        let mut hasher = Sha256::new();
        for field in self.fields {
            // cleaned values never contain a newline
            let value = subset.get(*field)?;
            hasher.update(field.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let digest: [u8; 32] = hasher.finalize().into();

        Some((subset, Fingerprint(hex::encode(digest))))
    }
}

/// Hex-encoded SHA-256 digest over a scheme's required field values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn article_fields() -> CanonicalFields {
        [
            (Field::PublicationDate, "2001"),
            (Field::FirstAuthor, "silva, jose"),
            (Field::Title, "malaria no brasil"),
            (Field::JournalTitle, "rev saude publica"),
        ]
        .into_iter()
        .map(|(f, v)| (f, CompactString::from(v)))
        .collect()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let scheme = SchemeTag::Article.scheme();
        let (_, first) = scheme.fingerprint(&article_fields()).unwrap();
        let (_, second) = scheme.fingerprint(&article_fields()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_depends_on_values() {
        let scheme = SchemeTag::Article.scheme();
        let mut other = article_fields();
        other.insert(Field::Title, "malaria no brasil ii");

        let (_, a) = scheme.fingerprint(&article_fields()).unwrap();
        let (_, b) = scheme.fingerprint(&other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_unrequired_fields() {
        let scheme = SchemeTag::Article.scheme();
        let mut extended = article_fields();
        extended.insert(Field::Volume, "35");

        let (subset, a) = scheme.fingerprint(&extended).unwrap();
        let (_, b) = scheme.fingerprint(&article_fields()).unwrap();
        assert_eq!(a, b);
        assert_eq!(subset, article_fields());
    }

    #[rstest]
    #[case(SchemeTag::Article, true)]
    #[case(SchemeTag::ArticleVolume, false)]
    #[case(SchemeTag::ArticleIssue, false)]
    #[case(SchemeTag::ArticleStartPage, false)]
    #[case(SchemeTag::Book, false)]
    fn test_all_or_nothing(#[case] tag: SchemeTag, #[case] keyed: bool) {
        assert_eq!(tag.scheme().fingerprint(&article_fields()).is_some(), keyed);
    }

    #[test]
    fn test_missing_required_field_yields_no_key() {
        for field in ARTICLE_FIELDS {
            let fields: CanonicalFields = article_fields()
                .iter()
                .filter(|(f, _)| f != field)
                .map(|(f, v)| (f, CompactString::from(v)))
                .collect();
            assert!(SchemeTag::Article.scheme().fingerprint(&fields).is_none());
        }
    }

    #[test]
    fn test_extra_field_schemes_extend_article() {
        for tag in [
            SchemeTag::ArticleVolume,
            SchemeTag::ArticleIssue,
            SchemeTag::ArticleStartPage,
        ] {
            let fields = tag.scheme().fields;
            assert_eq!(&fields[..4], ARTICLE_FIELDS);
            assert_eq!(fields.len(), 5);
        }
        assert_eq!(&CHAPTER_FIELDS[..5], BOOK_FIELDS);
    }

    #[test]
    fn test_scheme_tag_parse() {
        for tag in SchemeTag::ALL {
            assert_eq!(tag.as_str().parse::<SchemeTag>(), Ok(tag));
        }
        assert!("journal".parse::<SchemeTag>().is_err());
    }
}
