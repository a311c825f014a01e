//! From speeches to batch requests, and from batch output to span records.

use chrono::{Datelike, NaiveDate};
use figuras_core::clean::{clean_annexes, is_eligible};
use figuras_core::record::parse_speech_date;
use figuras_core::{Chunk, Engine, GlobalSpan, RejectedSpan, SpanRecord};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::batch::{Annotation, CustomId, RequestBuilder, RequestLine};
use crate::budget::{CostBudget, CostEstimate, ModelPrice};

/// A speech as read from the input JSONL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechDocument {
    #[serde(deserialize_with = "string_or_number")]
    pub document_id: String,

    pub text: String,

    #[serde(default)]
    pub date: Option<String>,

    #[serde(default)]
    pub speaker: Option<String>,

    #[serde(default)]
    pub party: Option<String>,
}

impl SpeechDocument {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            date: None,
            speaker: None,
            party: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Parsed speech date, if present and readable.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_speech_date)
    }

    /// Text the annotator sees. Span offsets refer to this text.
    pub fn cleaned_text(&self) -> String {
        clean_annexes(&self.text)
    }
}

/// Senate exports carry numeric speech codes; accept both forms.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "document_id must be a string or number, got {}",
            other
        ))),
    }
}

/// Why an annotation could not be placed in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedAnnotation {
    pub custom_id: String,
    pub reason: String,
}

/// Output of [`Pipeline::reconcile`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    /// Deduplicated records, ordered by document then position
    pub records: Vec<SpanRecord>,

    /// Spans that failed validation against their chunk
    pub rejected: Vec<RejectedSpan>,

    /// Annotations whose document or chunk is unknown
    pub unmatched: Vec<UnmatchedAnnotation>,
}

/// Result of building requests for a set of speeches.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub requests: Vec<RequestLine>,

    /// Documents skipped for having too few words
    pub ineligible: Vec<String>,

    /// Documents left out because the cost budget ran out
    pub over_budget: Vec<String>,
}

/// Ties cleaning, chunking, remapping and deduplication together.
#[derive(Debug, Clone)]
pub struct Pipeline {
    engine: Engine,
    min_words: usize,
}

impl Pipeline {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            min_words: figuras_core::clean::DEFAULT_MIN_WORDS,
        }
    }

    /// Speeches need strictly more than `min_words` words to be annotated.
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Chunks of a speech's cleaned text.
    ///
    /// Request building and reconciliation both go through here, so chunk
    /// indices and offsets agree on both sides of the batch.
    pub fn chunks(&self, document: &SpeechDocument) -> Vec<Chunk> {
        self.engine.chunk(&document.document_id, &document.cleaned_text())
    }

    /// Whether a speech is long enough to annotate.
    pub fn is_eligible(&self, document: &SpeechDocument) -> bool {
        is_eligible(&document.cleaned_text(), self.min_words)
    }

    /// Build request lines for every eligible speech.
    ///
    /// A speech is admitted whole or not at all: if any of its requests
    /// would exceed `budget`, none of them is emitted.
    pub fn prepare_requests(
        &self,
        documents: &[SpeechDocument],
        builder: &RequestBuilder,
        price: &ModelPrice,
        output_tokens: u64,
        prompt_cached: bool,
        budget: &CostBudget,
    ) -> PreparedBatch {
        let mut batch = PreparedBatch::default();

        for document in documents {
            if !self.is_eligible(document) {
                debug!(document_id = %document.document_id, "Speech too short, skipped");
                batch.ineligible.push(document.document_id.clone());
                continue;
            }

            let chunks = self.chunks(document);
            let estimate = chunks
                .iter()
                .map(|c| {
                    CostEstimate::for_text(
                        price,
                        builder.request_text(&c.text),
                        output_tokens,
                        prompt_cached,
                    )
                })
                .fold(CostEstimate::default(), merge_estimates);

            if !budget.try_admit(document.parsed_date().map(|d| d.year()), &estimate) {
                batch.over_budget.push(document.document_id.clone());
                continue;
            }

            batch.requests.extend(builder.document_requests(&chunks));
        }

        info!(
            requests = batch.requests.len(),
            ineligible = batch.ineligible.len(),
            over_budget = batch.over_budget.len(),
            "Prepared batch requests"
        );

        batch
    }

    /// Put annotations back into document coordinates and collapse
    /// duplicates.
    ///
    /// Invalid spans are collected, never clamped or dropped silently.
    /// Annotations pointing at unknown documents or chunks are reported
    /// in [`Reconciliation::unmatched`].
    pub fn reconcile(
        &self,
        documents: &[SpeechDocument],
        annotations: Vec<Annotation>,
    ) -> Reconciliation {
        let by_id: BTreeMap<&str, &SpeechDocument> = documents
            .iter()
            .map(|d| (d.document_id.as_str(), d))
            .collect();

        let mut chunk_cache: BTreeMap<String, Vec<Chunk>> = BTreeMap::new();
        let mut spans: BTreeMap<String, Vec<GlobalSpan>> = BTreeMap::new();
        let mut result = Reconciliation::default();

        for annotation in annotations {
            let CustomId { document_id, .. } = &annotation.custom_id;

            let Some(document) = by_id.get(document_id.as_str()) else {
                warn!(custom_id = %annotation.custom_id, "Annotation for unknown document");
                result.unmatched.push(UnmatchedAnnotation {
                    custom_id: annotation.custom_id.to_string(),
                    reason: "unknown document".to_string(),
                });
                continue;
            };

            let chunks = chunk_cache
                .entry(document_id.clone())
                .or_insert_with(|| self.chunks(document));

            if annotation.custom_id.chunk_index.is_none() && chunks.len() > 1 {
                warn!(
                    custom_id = %annotation.custom_id,
                    chunks = chunks.len(),
                    "Whole-document annotation for a chunked document; check chunking config"
                );
                result.unmatched.push(UnmatchedAnnotation {
                    custom_id: annotation.custom_id.to_string(),
                    reason: format!(
                        "whole-document id but the document splits into {} chunks",
                        chunks.len()
                    ),
                });
                continue;
            }

            let Some(chunk) = chunks.get(annotation.custom_id.index()) else {
                warn!(
                    custom_id = %annotation.custom_id,
                    chunks = chunks.len(),
                    "Annotation for unknown chunk"
                );
                result.unmatched.push(UnmatchedAnnotation {
                    custom_id: annotation.custom_id.to_string(),
                    reason: format!("document has {} chunks", chunks.len()),
                });
                continue;
            };

            let outcome = self.engine.remap_decoded(chunk, annotation.spans);
            result.rejected.extend(outcome.rejected);
            spans
                .entry(document_id.clone())
                .or_default()
                .extend(outcome.spans);
        }

        for (document_id, document_spans) in spans {
            let date = by_id.get(document_id.as_str()).and_then(|d| d.parsed_date());
            for span in self.engine.dedup(document_spans) {
                result.records.push(SpanRecord::new(document_id.clone(), date, span));
            }
        }

        info!(
            records = result.records.len(),
            rejected = result.rejected.len(),
            unmatched = result.unmatched.len(),
            "Reconciled batch output"
        );

        result
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Engine::default())
    }
}

fn merge_estimates(acc: CostEstimate, next: CostEstimate) -> CostEstimate {
    CostEstimate {
        text_tokens: acc.text_tokens + next.text_tokens,
        prompt_tokens: acc.prompt_tokens + next.prompt_tokens,
        output_tokens: acc.output_tokens + next.output_tokens,
        input_cost: acc.input_cost + next.input_cost,
        output_cost: acc.output_cost + next.output_cost,
        total_cost: acc.total_cost + next.total_cost,
    }
}
