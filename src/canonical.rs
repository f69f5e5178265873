//! Canonicalization of raw citation fields into comparable strings.
//!
//! Every function here is pure and infallible: a value that cannot be cleaned
//! comes back empty (or `None`), which the key generator reads as "field
//! absent" and which makes every scheme requiring that field unavailable for
//! the citation.

use crate::PersonName;
use crate::regex::Regex;
use crate::standardizer::StandardizedRecord;
use chrono::Datelike;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Characters that mark an author name as noise (digits, brackets, symbols).
const AUTHOR_DENYLIST: &[char] = &[
    '@', '≈', '≠', '‼', '∗', '¾', '²', '}', '=', '‰', '¶', '±', '³', '©', '¼', '[', ']', '#', '?',
    ')', '(', '{', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '!', '¡', '¿', '«', '»', '*',
    '/', '\\', '&', '%', '‖', '§', '®', '¹', '½',
];

/// Earliest publication year accepted as plausible.
pub const MIN_PUBLICATION_YEAR: i32 = 1000;

/// Names of the canonical fields a key scheme can require.
///
/// The serialized names are part of the dedup store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "cleaned_publication_date")]
    PublicationDate,
    #[serde(rename = "cleaned_first_author")]
    FirstAuthor,
    #[serde(rename = "cleaned_title")]
    Title,
    #[serde(rename = "cleaned_journal_title")]
    JournalTitle,
    #[serde(rename = "cleaned_source")]
    Source,
    #[serde(rename = "cleaned_publisher")]
    Publisher,
    #[serde(rename = "cleaned_publisher_address")]
    PublisherAddress,
    #[serde(rename = "cleaned_chapter_title")]
    ChapterTitle,
    #[serde(rename = "cleaned_chapter_first_author")]
    ChapterFirstAuthor,
    #[serde(rename = "cleaned_volume")]
    Volume,
    #[serde(rename = "cleaned_issue")]
    Issue,
    #[serde(rename = "cleaned_start_page")]
    StartPage,
}

impl Field {
    /// The field name used as fingerprint prefix and store key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::PublicationDate => "cleaned_publication_date",
            Field::FirstAuthor => "cleaned_first_author",
            Field::Title => "cleaned_title",
            Field::JournalTitle => "cleaned_journal_title",
            Field::Source => "cleaned_source",
            Field::Publisher => "cleaned_publisher",
            Field::PublisherAddress => "cleaned_publisher_address",
            Field::ChapterTitle => "cleaned_chapter_title",
            Field::ChapterFirstAuthor => "cleaned_chapter_first_author",
            Field::Volume => "cleaned_volume",
            Field::Issue => "cleaned_issue",
            Field::StartPage => "cleaned_start_page",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cleaned field values of one citation. Only non-empty values are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalFields(BTreeMap<Field, CompactString>);

impl CanonicalFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `field` unless it is empty. Returns whether it was stored.
    pub fn insert(&mut self, field: Field, value: impl Into<CompactString>) -> bool {
        let value = value.into();
        if value.is_empty() {
            return false;
        }
        self.0.insert(field, value);
        true
    }

    pub fn insert_opt(&mut self, field: Field, value: Option<CompactString>) -> bool {
        value.is_some_and(|v| self.insert(field, v))
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(CompactString::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(f, v)| (*f, v.as_str()))
    }

    /// Values of `fields`, in order, or `None` if any one of them is absent.
    pub fn select(&self, fields: &[Field]) -> Option<CanonicalFields> {
        let mut subset = CanonicalFields::new();
        for field in fields {
            let value = self.0.get(field)?;
            subset.0.insert(*field, value.clone());
        }
        Some(subset)
    }
}

impl FromIterator<(Field, CompactString)> for CanonicalFields {
    fn from_iter<T: IntoIterator<Item = (Field, CompactString)>>(iter: T) -> Self {
        let mut fields = CanonicalFields::new();
        for (field, value) in iter {
            fields.insert(field, value);
        }
        fields
    }
}

/// How a cleaned value will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Compared for equality: case-folded.
    Key,
    /// Shown to humans: case preserved.
    Display,
}

/// Reasons a publication date is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateQuality {
    /// No characters at all.
    Empty,
    /// Fewer than four characters.
    Size,
    /// The first four characters are not all ASCII digits.
    Char,
    /// Year outside `[MIN_PUBLICATION_YEAR, max_year]`.
    Value,
}

/// Decompose and drop combining marks.
pub fn remove_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Strip any number of trailing periods.
pub fn remove_period(text: &str) -> &str {
    text.trim_end_matches('.')
}

/// Generic cleaning applied to every textual field.
///
/// Removes diacritics, collapses whitespace, strips trailing periods and,
/// for [`FieldKind::Key`], folds case.
pub fn canonicalize(raw: &str, kind: FieldKind) -> String {
    let unaccented = remove_accents(raw);
    let collapsed = WHITESPACE_REGEX.replace_all(unaccented.trim(), " ");
    let cleaned = remove_period(&collapsed).trim_end();
    match kind {
        FieldKind::Key => cleaned.to_lowercase(),
        FieldKind::Display => cleaned.to_string(),
    }
}

/// Key-cleaning of an optional raw value.
pub fn clean_key(raw: Option<&str>) -> Option<CompactString> {
    let cleaned = canonicalize(raw?, FieldKind::Key);
    (!cleaned.is_empty()).then(|| CompactString::from(cleaned))
}

/// Assess a raw publication date against the plausible year range ending at `max_year`.
///
/// Only the first four characters are considered, so `"2025-03-01"` is read as `2025`.
pub fn date_quality(raw: &str, max_year: i32) -> Result<i32, DateQuality> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DateQuality::Empty);
    }

    let head: String = raw.chars().take(4).collect();
    if head.chars().count() < 4 {
        return Err(DateQuality::Size);
    }
    if !head.chars().all(|c| c.is_ascii_digit()) {
        return Err(DateQuality::Char);
    }

    let year: i32 = head.parse().map_err(|_| DateQuality::Char)?;
    if !(MIN_PUBLICATION_YEAR..=max_year).contains(&year) {
        return Err(DateQuality::Value);
    }
    Ok(year)
}

/// Clean a publication date to its four-digit year, bounded by `max_year`.
pub fn clean_publication_date_until(raw: Option<&str>, max_year: i32) -> Option<CompactString> {
    date_quality(raw?, max_year)
        .ok()
        .map(|year| compact_str::format_compact!("{year:04}"))
}

/// Clean a publication date to its four-digit year, bounded by the current year.
pub fn clean_publication_date(raw: Option<&str>) -> Option<CompactString> {
    clean_publication_date_until(raw, chrono::Utc::now().year())
}

/// Compose `"surname, given names"` from the parts present.
pub fn compose_author_name(name: &PersonName) -> String {
    [name.surname.as_deref(), name.given_names.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether a composed author name contains a noise marker.
pub fn has_invalid_author_chars(name: &str) -> bool {
    name.chars().any(|c| AUTHOR_DENYLIST.contains(&c))
}

/// Clean an author into a key, rejecting names containing noise markers.
pub fn clean_author_name(name: &PersonName) -> Option<CompactString> {
    let composed = compose_author_name(name);
    if composed.is_empty() || has_invalid_author_chars(&composed) {
        return None;
    }
    clean_key(Some(&composed))
}

/// Journal title key: the first usable standardized title, else the cleaned source.
pub fn clean_journal_title(
    standardized: Option<&StandardizedRecord>,
    source: Option<&str>,
) -> Option<CompactString> {
    standardized
        .into_iter()
        .flat_map(|record| record.official_journal_title.iter())
        .find_map(|title| clean_key(Some(title)))
        .or_else(|| clean_key(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("2025-03-01", Ok(2025))]
    #[case("1999", Ok(1999))]
    #[case("abcd", Err(DateQuality::Char))]
    #[case("19a5-01", Err(DateQuality::Char))]
    #[case("15", Err(DateQuality::Size))]
    #[case("", Err(DateQuality::Empty))]
    #[case("   ", Err(DateQuality::Empty))]
    #[case("3050", Err(DateQuality::Value))]
    #[case("0999", Err(DateQuality::Value))]
    fn test_date_quality(#[case] raw: &str, #[case] expected: Result<i32, DateQuality>) {
        assert_eq!(date_quality(raw, 2026), expected);
    }

    #[test]
    fn test_clean_publication_date_uses_current_year() {
        assert_eq!(
            clean_publication_date(Some("2001-12")),
            Some(CompactString::from("2001"))
        );
        assert_eq!(clean_publication_date(Some("9999")), None);
        assert_eq!(clean_publication_date(None), None);
    }

    #[rstest]
    #[case("Revista de Saúde Pública.", FieldKind::Key, "revista de saude publica")]
    #[case("Revista de Saúde Pública.", FieldKind::Display, "Revista de Saude Publica")]
    #[case("  São   Paulo..", FieldKind::Key, "sao paulo")]
    #[case("Ação. ", FieldKind::Key, "acao")]
    #[case("...", FieldKind::Key, "")]
    #[case("", FieldKind::Key, "")]
    fn test_canonicalize(#[case] raw: &str, #[case] kind: FieldKind, #[case] expected: &str) {
        assert_eq!(canonicalize(raw, kind), expected);
    }

    #[test]
    fn test_remove_accents_keeps_base_letters() {
        assert_eq!(remove_accents("Müller Ñandú çà"), "Muller Nandu ca");
    }

    #[rstest]
    #[case(Some("Silva"), Some("José A."), Some("silva, jose a"))]
    #[case(Some("Silva"), None, Some("silva"))]
    #[case(None, Some("Maria"), Some("maria"))]
    #[case(Some("Silva2"), Some("J"), None)]
    #[case(Some("[Anonymous]"), None, None)]
    #[case(Some("Smith & Co"), None, None)]
    #[case(None, None, None)]
    fn test_clean_author_name(
        #[case] surname: Option<&str>,
        #[case] given: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let name = PersonName {
            surname: surname.map(String::from),
            given_names: given.map(String::from),
        };
        assert_eq!(clean_author_name(&name).as_deref(), expected);
    }

    #[test]
    fn test_clean_journal_title_prefers_standardized() {
        let record = StandardizedRecord {
            id: "S0000-0000000000000100001-scl".to_string(),
            official_journal_title: vec!["".to_string(), "Cadernos de Saúde Pública".to_string()],
            official_abbreviated_journal_title: vec!["Cad. Saúde Pública".to_string()],
        };

        assert_eq!(
            clean_journal_title(Some(&record), Some("Cad Saude Publ")).as_deref(),
            Some("cadernos de saude publica")
        );
        assert_eq!(
            clean_journal_title(None, Some("Cad Saude Publ.")).as_deref(),
            Some("cad saude publ")
        );
        assert_eq!(clean_journal_title(None, Some(" . ")), None);
    }

    #[test]
    fn test_canonical_fields_skip_empty_values() {
        let mut fields = CanonicalFields::new();
        assert!(fields.insert(Field::Title, "a title"));
        assert!(!fields.insert(Field::Volume, ""));
        assert!(!fields.insert_opt(Field::Issue, None));

        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get(Field::Title), Some("a title"));
        assert!(!fields.contains(Field::Volume));
    }

    #[test]
    fn test_select_is_all_or_nothing() {
        let fields: CanonicalFields = [
            (Field::Title, CompactString::from("t")),
            (Field::PublicationDate, CompactString::from("2001")),
        ]
        .into_iter()
        .collect();

        let subset = fields.select(&[Field::PublicationDate, Field::Title]).unwrap();
        assert_eq!(subset.len(), 2);
        assert!(fields.select(&[Field::Title, Field::FirstAuthor]).is_none());
    }

    #[test]
    fn test_canonical_fields_serialize_with_cleaned_names() {
        let fields: CanonicalFields = [(Field::JournalTitle, CompactString::from("rev saude"))]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"cleaned_journal_title":"rev saude"}"#);

        let back: CanonicalFields = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
    }
}
