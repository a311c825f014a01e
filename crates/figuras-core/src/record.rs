//! Records exchanged with persistence and golden-set collaborators.
//!
//! Only document-global spans can become records, so nothing in chunk
//! coordinates ever leaves the engine.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::label::Label;
use crate::span::GlobalSpan;

/// A deduplicated span ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Stable identifier (see [`record_id`])
    pub id: String,

    /// Document the span belongs to
    pub document_id: String,

    /// Year of the speech, for downstream grouping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(flatten)]
    pub span: GlobalSpan,
}

impl SpanRecord {
    /// Wrap a global span. `date` is the speech date, if known.
    pub fn new(document_id: impl Into<String>, date: Option<NaiveDate>, span: GlobalSpan) -> Self {
        let document_id = document_id.into();
        Self {
            id: record_id(&document_id, span.label, span.start_char, span.end_char),
            year: date.map(|d| d.year()),
            document_id,
            span,
        }
    }
}

/// Reference spans for one document of the golden set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenDocument {
    pub document_id: String,

    #[serde(default)]
    pub spans: Vec<GlobalSpan>,
}

/// Deterministic record id: the first 8 bytes of
/// `sha256(document_id | label | start | end)`, hex encoded.
///
/// The same figure at the same place always gets the same id, so
/// re-running the pipeline is idempotent for storage.
pub fn record_id(document_id: &str, label: Label, start_char: usize, end_char: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"|");
    hasher.update(label.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(start_char.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(end_char.to_string().as_bytes());

    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Parse a speech date in the formats found in Senate exports.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, RFC 3339 and `DD/MM/YYYY`.
pub fn parse_speech_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(value, "%d/%m/%Y").ok()
}

/// Group golden documents by id, merging duplicates.
pub fn index_golden(documents: Vec<GoldenDocument>) -> BTreeMap<String, Vec<GlobalSpan>> {
    let mut index: BTreeMap<String, Vec<GlobalSpan>> = BTreeMap::new();
    for doc in documents {
        index.entry(doc.document_id).or_default().extend(doc.spans);
    }
    index
}

/// Group records by document id.
pub fn index_records(records: Vec<SpanRecord>) -> BTreeMap<String, Vec<GlobalSpan>> {
    let mut index: BTreeMap<String, Vec<GlobalSpan>> = BTreeMap::new();
    for record in records {
        index.entry(record.document_id).or_default().push(record.span);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_deterministic() {
        let a = record_id("123", Label::Ironia, 10, 20);
        let b = record_id("123", Label::Ironia, 10, 20);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_record_id_differs() {
        let base = record_id("123", Label::Ironia, 10, 20);
        assert_ne!(base, record_id("124", Label::Ironia, 10, 20));
        assert_ne!(base, record_id("123", Label::Metafora, 10, 20));
        assert_ne!(base, record_id("123", Label::Ironia, 11, 20));
        // Separators keep "1|23" and "12|3" apart
        assert_ne!(
            record_id("1", Label::Ironia, 23, 30),
            record_id("12", Label::Ironia, 3, 30)
        );
    }

    #[test]
    fn test_record_year_and_flatten() {
        let span = GlobalSpan::new(Label::Antitese, 5, 9, "sim e não").with_confidence(0.4);
        let record = SpanRecord::new("77", parse_speech_date("2019-03-14"), span);
        assert_eq!(record.year, Some(2019));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["label"], "antitese");
        assert_eq!(json["start_char"], 5);
        assert_eq!(json["year"], 2019);

        let back: SpanRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_parse_speech_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2015, 6, 2);
        assert_eq!(parse_speech_date("2015-06-02"), expected);
        assert_eq!(parse_speech_date("2015-06-02 14:30:00"), expected);
        assert_eq!(parse_speech_date("2015-06-02T14:30:00"), expected);
        assert_eq!(parse_speech_date("2015-06-02T14:30:00-03:00"), expected);
        assert_eq!(parse_speech_date("02/06/2015"), expected);
        assert_eq!(parse_speech_date("ontem"), None);
    }

    #[test]
    fn test_index_golden_merges() {
        let docs = vec![
            GoldenDocument {
                document_id: "a".to_string(),
                spans: vec![GlobalSpan::new(Label::Ironia, 0, 3, "abc")],
            },
            GoldenDocument {
                document_id: "a".to_string(),
                spans: vec![GlobalSpan::new(Label::Metafora, 4, 8, "defg")],
            },
        ];
        let index = index_golden(docs);
        assert_eq!(index["a"].len(), 2);
    }
}
