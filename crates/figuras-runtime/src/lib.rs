//! # figuras-runtime
//!
//! Batch plumbing around `figuras-core`.
//!
//! The core engine never touches files or the batch API. This crate turns
//! speeches into batch request lines, reads batch output back, and runs the
//! reconciliation pipeline that ends in deduplicated span records.
//!
//! ## Example
//!
//! ```rust
//! use figuras_runtime::batch::{parse_line, ParsedLine};
//! use figuras_runtime::{Pipeline, SpeechDocument};
//!
//! let speech = SpeechDocument::new("77", "Este país é um barco à deriva.");
//! let line = r#"{"custom_id": "disc-77", "response": {"output": [{"content": [
//!     {"type": "output_json", "json": {"spans": [{"label": "metafora",
//!      "start_char": 12, "end_char": 29, "text": "um barco à deriva",
//!      "rationale": null, "cues": [], "confidence": 0.9}]}}]}]}}"#;
//!
//! let ParsedLine::Annotated(annotation) = parse_line(1, line) else {
//!     panic!("unparsable line");
//! };
//!
//! let result = Pipeline::default().reconcile(&[speech], vec![annotation]);
//! assert_eq!(result.records.len(), 1);
//! assert_eq!(result.records[0].span.start_char, 12);
//! ```

use thiserror::Error;

pub mod batch;
pub mod budget;
pub mod config;
pub mod io;
pub mod pipeline;
pub mod sample;

pub use batch::{BatchConfig, BatchError, BatchJob, CustomId, JobError, JobStatus, RequestBuilder};
pub use budget::{BudgetConfig, CostBudget, CostEstimate, CostReport, PriceTable};
pub use config::RuntimeConfig;
pub use pipeline::{Pipeline, Reconciliation, SpeechDocument};
pub use sample::{SampleConfig, Sampler, Stratum};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Config(#[from] figuras_core::ConfigError),

    #[error("No price known for model '{0}'")]
    UnknownModel(String),
}

impl RuntimeConfig {
    /// Pipeline built from the engine and budget sections.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(figuras_core::Engine::new(self.engine.clone()))
            .with_min_words(self.budget.min_words)
    }

    /// Prices for the configured model.
    pub fn model_price(&self) -> Result<budget::ModelPrice, RuntimeError> {
        self.budget
            .price_table()
            .get(&self.batch.model)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownModel(self.batch.model.clone()))
    }
}
