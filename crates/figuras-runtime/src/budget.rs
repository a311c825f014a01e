//! Token and cost estimation for a batch.
//!
//! Token counts are approximated from character counts; the estimate is
//! meant for deciding whether a batch is affordable, not for billing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::batch::request::{DEVELOPER_PROMPT, USER_PREFIX};

/// Characters per token used by [`estimate_tokens`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of `text`.
///
/// This is a coarse stand-in for the model's real tokenizer: Portuguese
/// text with accents and long words can land well off the BPE count, so
/// treat the result as an order of magnitude.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub cached_input: f64,
    pub output: f64,
}

/// Known model prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    models: BTreeMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "gpt-5".to_string(),
            ModelPrice {
                input: 0.625,
                cached_input: 0.0625,
                output: 5.00,
            },
        );
        Self { models }
    }
}

impl PriceTable {
    /// Add or replace a model's prices.
    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.models.get(model)
    }
}

/// Estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Stop admitting requests once this many USD are committed
    pub max_usd: Option<f64>,

    /// Expected output tokens per request
    pub output_tokens_per_request: u64,

    /// Price the fixed prompt as cached input
    pub prompt_cached: bool,

    /// Speeches must have more words than this to be sent
    pub min_words: usize,

    /// Extra or overriding model prices
    pub prices: BTreeMap<String, ModelPrice>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_usd: None,
            output_tokens_per_request: 0,
            prompt_cached: true,
            min_words: figuras_core::clean::DEFAULT_MIN_WORDS,
            prices: BTreeMap::new(),
        }
    }
}

impl BudgetConfig {
    /// Default prices merged with the configured ones.
    pub fn price_table(&self) -> PriceTable {
        self.prices
            .iter()
            .fold(PriceTable::default(), |table, (model, price)| {
                table.with_model(model.clone(), *price)
            })
    }
}

/// Estimated cost of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub text_tokens: u64,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl CostEstimate {
    /// Estimate a request sending `text` with the standard prompt.
    pub fn for_text(price: &ModelPrice, text: &str, output_tokens: u64, prompt_cached: bool) -> Self {
        let prompt_tokens = estimate_tokens(DEVELOPER_PROMPT) + estimate_tokens(USER_PREFIX);
        Self::from_tokens(price, estimate_tokens(text), prompt_tokens, output_tokens, prompt_cached)
    }

    pub fn from_tokens(
        price: &ModelPrice,
        text_tokens: u64,
        prompt_tokens: u64,
        output_tokens: u64,
        prompt_cached: bool,
    ) -> Self {
        let per_token = |rate: f64| rate / 1_000_000.0;

        let prompt_rate = if prompt_cached && prompt_tokens > 0 {
            price.cached_input
        } else {
            price.input
        };
        let input_cost = text_tokens as f64 * per_token(price.input)
            + prompt_tokens as f64 * per_token(prompt_rate);
        let output_cost = output_tokens as f64 * per_token(price.output);

        Self {
            text_tokens,
            prompt_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.text_tokens + self.prompt_tokens
    }
}

/// Sum of many estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub requests: usize,
    pub text_tokens: u64,
    pub prompt_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl CostSummary {
    pub fn add(&mut self, estimate: &CostEstimate) {
        self.requests += 1;
        self.text_tokens += estimate.text_tokens;
        self.prompt_tokens += estimate.prompt_tokens;
        self.input_tokens += estimate.input_tokens();
        self.output_tokens += estimate.output_tokens;
        self.input_cost += estimate.input_cost;
        self.output_cost += estimate.output_cost;
        self.total_cost += estimate.total_cost;
    }
}

/// Costs grouped by speech year.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostReport {
    pub by_year: BTreeMap<i32, CostSummary>,

    /// Requests whose speech has no usable date
    pub undated: CostSummary,

    pub total: CostSummary,
}

impl CostReport {
    pub fn add(&mut self, year: Option<i32>, estimate: &CostEstimate) {
        match year {
            Some(year) => self.by_year.entry(year).or_default().add(estimate),
            None => self.undated.add(estimate),
        }
        self.total.add(estimate);
    }
}

/// USD cap shared by everything building requests for one batch.
#[derive(Debug)]
pub struct CostBudget {
    max_usd: Option<f64>,
    committed: Mutex<CostReport>,
}

impl CostBudget {
    /// Create a budget. `None` never refuses a request.
    pub fn new(max_usd: Option<f64>) -> Self {
        Self {
            max_usd,
            committed: Mutex::new(CostReport::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Commit `estimate` if it fits under the cap.
    ///
    /// Returns `false`, committing nothing, when the request would push the
    /// total past the cap.
    pub fn try_admit(&self, year: Option<i32>, estimate: &CostEstimate) -> bool {
        let mut committed = self.committed.lock();
        if let Some(max) = self.max_usd {
            if committed.total.total_cost + estimate.total_cost > max {
                debug!(
                    committed = committed.total.total_cost,
                    requested = estimate.total_cost,
                    max,
                    "Request refused by cost budget"
                );
                return false;
            }
        }
        committed.add(year, estimate);
        true
    }

    /// USD committed so far.
    pub fn spent(&self) -> f64 {
        self.committed.lock().total.total_cost
    }

    /// USD left under the cap, if there is one.
    pub fn remaining(&self) -> Option<f64> {
        self.max_usd.map(|max| (max - self.spent()).max(0.0))
    }

    /// Snapshot of everything admitted so far.
    pub fn report(&self) -> CostReport {
        self.committed.lock().clone()
    }
}
