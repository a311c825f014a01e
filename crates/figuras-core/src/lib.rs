//! # figuras-core
//!
//! Deterministic span reconciliation and matching for rhetorical-figure
//! annotation of Senate speeches.
//!
//! This crate takes spans produced per chunk by an external annotator,
//! answers:
//! - Where is this span in the whole document?
//! - Is it a duplicate of another emission of the same figure?
//! - Does it agree with the golden set?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No I/O**: Every operation is a pure transformation in memory
//! 3. **Typed coordinates**: Chunk-local and document-global spans are
//!    different types and cannot be compared with each other
//! 4. **No NaN**: Undefined ratios are reported as such
//!
//! ## Example
//!
//! ```rust
//! use figuras_core::{Chunk, Engine, EngineConfig, Label, LocalSpan};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let chunk = Chunk::new("1234", 1, 1000, "O tempo é um senhor implacável.");
//! let spans = vec![
//!     LocalSpan::new(Label::Prosopopeia, 2, 30, "tempo é um senhor implacável").with_confidence(0.8),
//! ];
//!
//! let global = engine.remap(&chunk, spans).spans;
//! assert_eq!(global[0].start_char, 1002);
//!
//! let kept = engine.dedup(global);
//! let report = engine.evaluate(&kept, &kept).report();
//! assert_eq!(report.aggregate.f1.value(), Some(1.0));
//! ```

pub mod chunk;
pub mod clean;
pub mod config;
pub mod dedup;
pub mod evaluate;
pub mod label;
pub mod overlap;
pub mod record;
pub mod remap;
pub mod span;

// Re-export main types at crate root
pub use chunk::{Chunk, Chunker};
pub use config::{ChunkingConfig, ConfigError, EngineConfig};
pub use dedup::Deduplicator;
pub use evaluate::{
    Counts, Evaluation, EvaluationReport, Evaluator, LabelScores, MatchStrategy, Matching, Score,
};
pub use label::{Label, UnknownLabel};
pub use overlap::iou;
pub use record::{GoldenDocument, SpanRecord};
pub use remap::{remap_chunk, remap_spans, RejectedSpan, RemapError, RemapOutcome, Remapper};
pub use span::{CoordinateSpace, Global, GlobalSpan, Local, LocalSpan, Span, SpanError};

use std::collections::BTreeMap;

/// The reconciliation engine, configured once and reused.
///
/// Bundles the remapper, deduplicator, chunker and evaluator built from an
/// [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    remapper: Remapper,
    deduplicator: Deduplicator,
    evaluator: Evaluator,
    chunker: Chunker,
}

impl Engine {
    /// Build an engine. The config is assumed validated (see
    /// [`EngineConfig::validate`]).
    pub fn new(config: EngineConfig) -> Self {
        Self {
            remapper: Remapper::new().verify_text(config.verify_text),
            deduplicator: Deduplicator::new(config.dedup_threshold),
            evaluator: Evaluator::new(config.match_threshold).with_strategy(config.match_strategy),
            chunker: Chunker::from(&config.chunking),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Split a document into annotation windows.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        self.chunker.split(document_id, text)
    }

    /// Validate and remap one chunk's spans.
    pub fn remap(&self, chunk: &Chunk, spans: Vec<LocalSpan>) -> RemapOutcome {
        self.remapper.remap(chunk, spans)
    }

    /// Remap spans decoded one at a time; `Err` entries are rejected in place.
    pub fn remap_decoded<I>(&self, chunk: &Chunk, spans: I) -> RemapOutcome
    where
        I: IntoIterator<Item = Result<LocalSpan, SpanError>>,
    {
        self.remapper.remap_decoded(chunk, spans)
    }

    /// Collapse same-label near-duplicates.
    pub fn dedup(&self, spans: Vec<GlobalSpan>) -> Vec<GlobalSpan> {
        self.deduplicator.dedup(spans)
    }

    /// Score one document.
    pub fn evaluate(&self, predicted: &[GlobalSpan], reference: &[GlobalSpan]) -> Evaluation<Global> {
        self.evaluator.evaluate(predicted, reference)
    }

    /// Score the golden documents of a corpus, keyed by document id.
    pub fn evaluate_corpus(
        &self,
        predicted: &BTreeMap<String, Vec<GlobalSpan>>,
        reference: &BTreeMap<String, Vec<GlobalSpan>>,
    ) -> EvaluationReport {
        self.evaluator.evaluate_corpus(predicted, reference)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_end_to_end() {
        let text = "Senhores, a corrupção é um câncer. A corrupção é um câncer que mata.";
        let engine = Engine::new(EngineConfig {
            chunking: ChunkingConfig {
                max_chars: 40,
                overlap_chars: 30,
            },
            ..EngineConfig::default()
        });

        let chunks = engine.chunk("9", text);
        assert!(chunks.len() >= 2);

        // The annotator sees "câncer" in two overlapping windows and reports it twice.
        let target_start = text.find("a corrupção é um câncer").unwrap();
        let target_start = text[..target_start].chars().count();
        let target_len = "a corrupção é um câncer".chars().count();

        let mut global = Vec::new();
        for chunk in &chunks {
            let range = chunk.global_range();
            if range.start <= target_start && target_start + target_len <= range.end {
                let local_start = target_start - chunk.global_offset;
                let spans = vec![LocalSpan::new(
                    Label::Metafora,
                    local_start,
                    local_start + target_len,
                    "a corrupção é um câncer",
                )
                .with_confidence(0.5 + chunk.index as f64 / 10.0)];
                global.extend(engine.remap(chunk, spans).spans);
            }
        }
        assert!(global.len() >= 2);

        let kept = engine.dedup(global);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].start_char, target_start);

        let golden = vec![GlobalSpan::new(
            Label::Metafora,
            target_start,
            target_start + target_len,
            "a corrupção é um câncer",
        )];
        let evaluation = engine.evaluate(&kept, &golden);
        assert_eq!(evaluation.counts().true_positives, 1);
    }
}
