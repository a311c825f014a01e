//! Labeled character intervals.
//!
//! A [`Span`] carries its coordinate space in the type: spans read from a
//! chunk's annotation are `Span<Local>`, and only the remapper turns them
//! into `Span<Global>`. Overlap, deduplication and evaluation are generic
//! over one space at a time, so a local span can never be compared with a
//! global one.
//!
//! Offsets count characters (Unicode scalar values), matching how the
//! annotation model and the golden set index speech text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;

use crate::label::Label;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Local {}
    impl Sealed for super::Global {}
}

/// Marker trait for span coordinate spaces.
pub trait CoordinateSpace:
    sealed::Sealed + Debug + Clone + Copy + PartialEq + Eq + Default + Send + Sync + 'static
{
    /// Name used in log output.
    const NAME: &'static str;
}

/// Offsets relative to the start of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Local;

/// Offsets relative to the start of the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Global;

impl CoordinateSpace for Local {
    const NAME: &'static str = "local";
}

impl CoordinateSpace for Global {
    const NAME: &'static str = "global";
}

/// Span in chunk-local coordinates.
pub type LocalSpan = Span<Local>;

/// Span in document-global coordinates.
pub type GlobalSpan = Span<Global>;

/// Problems with a single span.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpanError {
    #[error("Invalid range: start_char {start} must be lower than end_char {end}")]
    InvalidRange { start: usize, end: usize },

    #[error("Confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Span end {end} exceeds chunk length {length}")]
    OutOfChunkBounds { end: usize, length: usize },

    #[error("Text mismatch: span says '{expected}', source has '{actual}'")]
    TextMismatch { expected: String, actual: String },

    #[error("Span end {end} shifted by {offset} overflows")]
    OffsetOverflow { end: usize, offset: usize },

    #[error("Undecodable span: {0}")]
    Undecodable(String),
}

/// A labeled text interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Span<C: CoordinateSpace> {
    /// Figure of speech
    pub label: Label,

    /// First character of the interval
    pub start_char: usize,

    /// One past the last character of the interval
    pub end_char: usize,

    /// Covered text as reported by the producer
    #[serde(default)]
    pub text: String,

    /// Why the producer thinks this is a figure
    #[serde(default)]
    pub rationale: Option<String>,

    /// Detection heuristics that fired
    #[serde(default)]
    pub cues: BTreeSet<String>,

    /// Producer confidence in [0, 1]; curated references may omit it
    #[serde(default = "full_confidence")]
    pub confidence: f64,

    #[serde(skip)]
    space: PhantomData<C>,
}

fn full_confidence() -> f64 {
    1.0
}

impl<C: CoordinateSpace> Span<C> {
    /// Create a span with full confidence and no rationale or cues.
    pub fn new(label: Label, start_char: usize, end_char: usize, text: impl Into<String>) -> Self {
        Self {
            label,
            start_char,
            end_char,
            text: text.into(),
            rationale: None,
            cues: BTreeSet::new(),
            confidence: 1.0,
            space: PhantomData,
        }
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Add detection cues.
    pub fn with_cues<I, S>(mut self, cues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cues.extend(cues.into_iter().map(Into::into));
        self
    }

    /// Number of characters covered (zero for degenerate spans).
    pub fn len(&self) -> usize {
        self.end_char.saturating_sub(self.start_char)
    }

    /// True when the span covers no characters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the invariants that do not depend on source text.
    pub fn validate(&self) -> Result<(), SpanError> {
        if self.end_char <= self.start_char {
            return Err(SpanError::InvalidRange {
                start: self.start_char,
                end: self.end_char,
            });
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SpanError::ConfidenceOutOfRange(self.confidence));
        }

        Ok(())
    }

    /// Check that `text` matches the slice of `source` under this span.
    ///
    /// Whitespace runs are collapsed on both sides before comparing.
    pub fn verify_text(&self, source: &str) -> Result<(), SpanError> {
        let actual = char_slice(source, self.start_char, self.end_char).ok_or(
            SpanError::OutOfChunkBounds {
                end: self.end_char,
                length: source.chars().count(),
            },
        )?;

        if normalize_whitespace(actual) != normalize_whitespace(&self.text) {
            return Err(SpanError::TextMismatch {
                expected: self.text.clone(),
                actual: actual.to_string(),
            });
        }

        Ok(())
    }

    /// Move both offsets by `offset` into another coordinate space.
    ///
    /// Offsets saturate at `usize::MAX`.
    fn offset_into<D: CoordinateSpace>(self, offset: usize) -> Span<D> {
        Span {
            label: self.label,
            start_char: self.start_char.saturating_add(offset),
            end_char: self.end_char.saturating_add(offset),
            text: self.text,
            rationale: self.rationale,
            cues: self.cues,
            confidence: self.confidence,
            space: PhantomData,
        }
    }
}

impl Span<Local> {
    /// Re-express this span in document coordinates.
    ///
    /// Use [`crate::remap::remap_chunk`] at the annotation boundary; it
    /// validates against the chunk before calling this.
    pub fn into_global(self, global_offset: usize) -> Span<Global> {
        self.offset_into(global_offset)
    }
}

impl Span<Global> {
    /// Re-base a document span, e.g. when documents are concatenated.
    pub fn shifted(self, offset: usize) -> Span<Global> {
        self.offset_into(offset)
    }
}

/// Slice `text` by character offsets. Returns `None` when out of bounds.
pub fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }

    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let start_byte = indices.nth(start)?;
    let end_byte = if end == start {
        start_byte
    } else {
        indices.nth(end - start - 1)?
    };

    Some(&text[start_byte..end_byte])
}

/// Collapse whitespace runs to single spaces and trim.
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
