//! Chunk-local to document-global offset remapping.
//!
//! [`remap_spans`] is the pure offset shift. [`Remapper`] is the boundary
//! where annotator output enters the engine: every span is validated
//! against its chunk first, and invalid spans are reported with the chunk
//! id and their position in the annotator's list.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::span::{GlobalSpan, LocalSpan, SpanError};

/// A span rejected at the remapping boundary.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("Span {index} of chunk {chunk_id} rejected: {reason}")]
pub struct RejectedSpan {
    /// Chunk the span was produced for
    pub chunk_id: String,

    /// Position of the span in the chunk's annotation list
    pub index: usize,

    /// What was wrong with it
    #[serde(serialize_with = "serialize_display")]
    pub reason: SpanError,
}

/// Error returned when a chunk's annotation contains invalid spans.
#[derive(Error, Debug, Clone)]
#[error("Chunk {chunk_id}: {} span(s) rejected", .rejected.len())]
pub struct RemapError {
    pub chunk_id: String,
    pub rejected: Vec<RejectedSpan>,
}

/// Result of remapping one chunk: accepted spans plus rejections.
#[derive(Debug, Clone, Default)]
pub struct RemapOutcome {
    /// Valid spans in document coordinates, in input order
    pub spans: Vec<GlobalSpan>,

    /// Invalid spans, in input order
    pub rejected: Vec<RejectedSpan>,
}

impl RemapOutcome {
    /// Fail if anything was rejected.
    pub fn into_result(self, chunk_id: &str) -> Result<Vec<GlobalSpan>, RemapError> {
        if self.rejected.is_empty() {
            Ok(self.spans)
        } else {
            Err(RemapError {
                chunk_id: chunk_id.to_string(),
                rejected: self.rejected,
            })
        }
    }
}

/// Shift every span by `global_offset`.
///
/// Order and cardinality are preserved; no validation is done, and
/// offsets saturate instead of overflowing.
pub fn remap_spans(spans: Vec<LocalSpan>, global_offset: usize) -> Vec<GlobalSpan> {
    spans
        .into_iter()
        .map(|span| span.into_global(global_offset))
        .collect()
}

/// Validating remapper for annotator output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Remapper {
    verify_text: bool,
}

impl Remapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require each span's text to match the chunk slice.
    pub fn verify_text(mut self, verify: bool) -> Self {
        self.verify_text = verify;
        self
    }

    /// Validate `spans` against `chunk` and remap the valid ones.
    pub fn remap(&self, chunk: &Chunk, spans: Vec<LocalSpan>) -> RemapOutcome {
        self.remap_decoded(chunk, spans.into_iter().map(Ok))
    }

    /// Like [`Remapper::remap`], for spans decoded one at a time.
    ///
    /// An `Err` entry is a span that could not be decoded; it is rejected
    /// at its position without affecting its neighbours.
    pub fn remap_decoded<I>(&self, chunk: &Chunk, spans: I) -> RemapOutcome
    where
        I: IntoIterator<Item = Result<LocalSpan, SpanError>>,
    {
        let mut outcome = RemapOutcome::default();

        for (index, span) in spans.into_iter().enumerate() {
            match span.and_then(|span| self.check(chunk, &span).map(|()| span)) {
                Ok(span) => outcome.spans.push(span.into_global(chunk.global_offset)),
                Err(reason) => {
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        index,
                        %reason,
                        "Rejected span at remapping boundary"
                    );
                    outcome.rejected.push(RejectedSpan {
                        chunk_id: chunk.chunk_id.clone(),
                        index,
                        reason,
                    });
                }
            }
        }

        debug!(
            chunk_id = %chunk.chunk_id,
            accepted = outcome.spans.len(),
            rejected = outcome.rejected.len(),
            "Remapped chunk"
        );

        outcome
    }

    /// Strict variant of [`Remapper::remap`]: any rejection fails the chunk.
    pub fn remap_strict(
        &self,
        chunk: &Chunk,
        spans: Vec<LocalSpan>,
    ) -> Result<Vec<GlobalSpan>, RemapError> {
        self.remap(chunk, spans).into_result(&chunk.chunk_id)
    }

    fn check(&self, chunk: &Chunk, span: &LocalSpan) -> Result<(), SpanError> {
        span.validate()?;

        if span.end_char > chunk.len() {
            return Err(SpanError::OutOfChunkBounds {
                end: span.end_char,
                length: chunk.len(),
            });
        }

        if span.end_char.checked_add(chunk.global_offset).is_none() {
            return Err(SpanError::OffsetOverflow {
                end: span.end_char,
                offset: chunk.global_offset,
            });
        }

        if self.verify_text {
            span.verify_text(&chunk.text)?;
        }

        Ok(())
    }
}

/// Remap one chunk's spans with default validation (no text check).
pub fn remap_chunk(chunk: &Chunk, spans: Vec<LocalSpan>) -> Result<Vec<GlobalSpan>, RemapError> {
    Remapper::new().remap_strict(chunk, spans)
}

fn serialize_display<S: serde::Serializer>(
    value: &SpanError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
