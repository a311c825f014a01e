//! Speech text cleaning before chunking.
//!
//! Senate transcripts often append annexes (documents read into the record)
//! after a marker line. Everything from the first marker on is dropped so
//! the annotator only sees the speech itself.

use lazy_static::lazy_static;
use regex::Regex;

/// Minimum word count a speech must exceed to be worth annotating.
pub const DEFAULT_MIN_WORDS: usize = 200;

lazy_static! {
    /// Annex markers: `****`, "SEGUE, NA ÍNTEGRA, PRONUNCIAMENTO",
    /// "DOCUMENTO ENCAMINHADO PELO/PELA", optionally quoted.
    pub static ref ANNEX_PATTERN: Regex = Regex::new(
        r#"(?is)(?:\*\*\*\*|["“”]?\s*SEGUE,?\s+NA\s+ÍNTEGRA,?\s+PRONUNCIAMENTO["“”]?|["“”]?\s*DOCUMENTO\s+ENCAMINHADO\s+PEL[OA]["“”]?).*"#
    ).unwrap();
}

/// Remove annexes and surrounding whitespace.
pub fn clean_annexes(text: &str) -> String {
    ANNEX_PATTERN.replace(text, "").trim().to_string()
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whether a speech has strictly more than `min_words` words.
pub fn is_eligible(text: &str, min_words: usize) -> bool {
    word_count(text) > min_words
}
