//! Stratified, seeded sampling of speeches.
//!
//! Speeches are grouped by party or by year and a share of each group is
//! drawn. The same seed and input always give the same sample.

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::pipeline::SpeechDocument;

/// How speeches are grouped before drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stratum {
    /// One group per party; speeches without a party form their own group
    #[default]
    Party,

    /// One group per speech year; undated speeches are left out
    Year,
}

/// How a group's share is turned into a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    #[default]
    Ceil,
    Floor,
}

/// Sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub by: Stratum,

    /// Share of each group to draw. Values above 1 are percentages.
    pub fraction: f64,

    pub rounding: Rounding,

    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self::by_party()
    }
}

impl SampleConfig {
    /// 1% of each party, rounded up.
    pub fn by_party() -> Self {
        Self {
            by: Stratum::Party,
            fraction: 0.01,
            rounding: Rounding::Ceil,
            seed: 42,
        }
    }

    /// 10% of each year, rounded down.
    pub fn by_year() -> Self {
        Self {
            by: Stratum::Year,
            fraction: 0.10,
            rounding: Rounding::Floor,
            seed: 42,
        }
    }

    /// `fraction` as a share in `(0, 1]`.
    pub fn share(&self) -> f64 {
        if self.fraction > 1.0 {
            self.fraction / 100.0
        } else {
            self.fraction
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fraction.is_nan() || self.fraction <= 0.0 || self.fraction > 100.0 {
            return Err(format!(
                "sample.fraction must be in (0, 100], got {}",
                self.fraction
            ));
        }
        Ok(())
    }

    /// Number of speeches to draw from a group of `n`.
    ///
    /// Every non-empty group contributes at least one speech.
    pub fn group_size(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let exact = n as f64 * self.share();
        let k = match self.rounding {
            Rounding::Ceil => exact.ceil(),
            Rounding::Floor => exact.floor(),
        } as usize;
        k.clamp(1, n)
    }
}

/// Per-group tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StratumCount {
    pub stratum: String,
    pub available: usize,
    pub sampled: usize,
}

/// Drawn speeches, in input order, plus per-group tallies.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub documents: Vec<SpeechDocument>,
    pub strata: Vec<StratumCount>,

    /// Speeches that fit no group (undated, when sampling by year)
    pub skipped: usize,
}

/// Draws stratified samples.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    config: SampleConfig,
}

impl Sampler {
    pub fn new(config: SampleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    fn stratum_of(&self, document: &SpeechDocument) -> Option<String> {
        match self.config.by {
            Stratum::Party => Some(
                document
                    .party
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .unwrap_or("-")
                    .to_string(),
            ),
            Stratum::Year => document.parsed_date().map(|d| d.year().to_string()),
        }
    }

    /// Draw from `documents`. Groups are visited in key order, so the
    /// result depends only on the seed and the input.
    pub fn sample(&self, documents: &[SpeechDocument]) -> Sample {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut sample = Sample::default();

        for (i, document) in documents.iter().enumerate() {
            match self.stratum_of(document) {
                Some(key) => groups.entry(key).or_default().push(i),
                None => sample.skipped += 1,
            }
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut chosen: Vec<usize> = Vec::new();

        for (stratum, members) in groups {
            let k = self.config.group_size(members.len());
            chosen.extend(members.choose_multiple(&mut rng, k).copied());
            debug!(%stratum, available = members.len(), sampled = k, "Sampled stratum");
            sample.strata.push(StratumCount {
                stratum,
                available: members.len(),
                sampled: k,
            });
        }

        chosen.sort_unstable();
        sample.documents = chosen.into_iter().map(|i| documents[i].clone()).collect();

        info!(
            by = ?self.config.by,
            strata = sample.strata.len(),
            sampled = sample.documents.len(),
            skipped = sample.skipped,
            "Drew stratified sample"
        );

        sample
    }
}
