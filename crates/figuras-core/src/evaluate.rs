//! Scoring predictions against a golden set.
//!
//! A prediction may only match a reference with the same label whose IoU
//! reaches the threshold. Matching is one-to-one. Matched pairs are true
//! positives, leftover predictions false positives, leftover references
//! false negatives.
//!
//! Ratios with a zero denominator are [`Score::Undefined`] instead of NaN.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::label::Label;
use crate::overlap::iou;
use crate::span::{CoordinateSpace, Span};

/// Default IoU a prediction needs to match a reference.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.5;

/// How eligible pairs are turned into a one-to-one matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Take pairs by descending IoU while both sides are free
    #[default]
    Greedy,

    /// Maximise the number of matched pairs (augmenting paths)
    MaximumCardinality,
}

/// A ratio that may be undefined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Defined(f64),
    Undefined,
}

impl Score {
    /// `numerator / denominator`, undefined when the denominator is zero.
    pub fn ratio(numerator: usize, denominator: usize) -> Self {
        if denominator == 0 {
            Score::Undefined
        } else {
            Score::Defined(numerator as f64 / denominator as f64)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Score::Defined(v) => Some(*v),
            Score::Undefined => None,
        }
    }

    /// The value, with undefined reported as `0.0`.
    pub fn value_or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Score::Defined(_))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Defined(v) => write!(f, "{:.3}", v),
            Score::Undefined => f.write_str("undefined"),
        }
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// Confusion counts for one label or for all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Counts {
    /// `tp / (tp + fp)`
    pub fn precision(&self) -> Score {
        Score::ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    /// `tp / (tp + fn)`
    pub fn recall(&self) -> Score {
        Score::ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    /// Harmonic mean of precision and recall, written as
    /// `2tp / (2tp + fp + fn)`.
    ///
    /// Equal to `2PR / (P + R)` whenever both are defined (and `0.0` when
    /// both are zero); undefined only when there is nothing to count.
    pub fn f1(&self) -> Score {
        Score::ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.true_positives + self.false_positives + self.false_negatives == 0
    }

    fn add(&mut self, other: &Counts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

/// Counts with their derived scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabelScores {
    #[serde(flatten)]
    pub counts: Counts,
    pub precision: Score,
    pub recall: Score,
    pub f1: Score,
}

impl From<Counts> for LabelScores {
    fn from(counts: Counts) -> Self {
        Self {
            counts,
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
        }
    }
}

/// Per-label and aggregate scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Number of documents scored
    pub documents: usize,

    /// Scores for every label present in predictions or references
    pub per_label: BTreeMap<Label, LabelScores>,

    /// Micro-averaged scores (counts summed over labels)
    pub aggregate: LabelScores,

    /// Unweighted mean of per-label F1
    pub macro_f1: Score,
}

impl EvaluationReport {
    /// Build a report from per-label counts.
    pub fn from_counts(documents: usize, per_label: &BTreeMap<Label, Counts>) -> Self {
        let mut aggregate = Counts::default();
        for counts in per_label.values() {
            aggregate.add(counts);
        }

        let f1s: Vec<f64> = per_label
            .values()
            .filter_map(|c| c.f1().value())
            .collect();
        let macro_f1 = if f1s.is_empty() {
            Score::Undefined
        } else {
            Score::Defined(f1s.iter().sum::<f64>() / f1s.len() as f64)
        };

        Self {
            documents,
            per_label: per_label
                .iter()
                .filter(|(_, c)| !c.is_empty())
                .map(|(label, c)| (*label, LabelScores::from(*c)))
                .collect(),
            aggregate: aggregate.into(),
            macro_f1,
        }
    }
}

/// Indices of one matched prediction/reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexPair {
    pub predicted: usize,
    pub reference: usize,
    pub iou: f64,
}

/// One-to-one assignment between predictions and references, by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Matching {
    pub pairs: Vec<IndexPair>,
    pub unmatched_predicted: Vec<usize>,
    pub unmatched_reference: Vec<usize>,
}

/// A true positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct MatchedPair<C: CoordinateSpace> {
    pub predicted: Span<C>,
    pub reference: Span<C>,
    pub iou: f64,
}

/// Outcome of scoring one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Evaluation<C: CoordinateSpace> {
    pub true_positives: Vec<MatchedPair<C>>,
    pub false_positives: Vec<Span<C>>,
    pub false_negatives: Vec<Span<C>>,
}

impl<C: CoordinateSpace> Evaluation<C> {
    /// Confusion counts grouped by label.
    pub fn counts_by_label(&self) -> BTreeMap<Label, Counts> {
        let mut counts: BTreeMap<Label, Counts> = BTreeMap::new();
        for pair in &self.true_positives {
            counts.entry(pair.predicted.label).or_default().true_positives += 1;
        }
        for span in &self.false_positives {
            counts.entry(span.label).or_default().false_positives += 1;
        }
        for span in &self.false_negatives {
            counts.entry(span.label).or_default().false_negatives += 1;
        }
        counts
    }

    /// Counts over all labels.
    pub fn counts(&self) -> Counts {
        Counts {
            true_positives: self.true_positives.len(),
            false_positives: self.false_positives.len(),
            false_negatives: self.false_negatives.len(),
        }
    }

    /// Scores for this single document.
    pub fn report(&self) -> EvaluationReport {
        EvaluationReport::from_counts(1, &self.counts_by_label())
    }
}

/// Matches predicted spans against golden references.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    threshold: f64,
    strategy: MatchStrategy,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Evaluator {
    /// Create a greedy evaluator with the given IoU threshold.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            strategy: MatchStrategy::Greedy,
        }
    }

    /// Choose the matching strategy.
    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Pairs with equal labels and `iou >= threshold`, as
    /// `(predicted, reference, iou)`.
    fn eligible_pairs<C: CoordinateSpace>(
        &self,
        predicted: &[Span<C>],
        reference: &[Span<C>],
    ) -> Vec<IndexPair> {
        let mut pairs = Vec::new();
        for (p, ps) in predicted.iter().enumerate() {
            for (r, rs) in reference.iter().enumerate() {
                if ps.label != rs.label {
                    continue;
                }
                let overlap = iou(ps, rs);
                if overlap >= self.threshold && overlap > 0.0 {
                    pairs.push(IndexPair {
                        predicted: p,
                        reference: r,
                        iou: overlap,
                    });
                }
            }
        }
        pairs
    }

    /// Compute the one-to-one matching by index.
    pub fn match_indices<C: CoordinateSpace>(
        &self,
        predicted: &[Span<C>],
        reference: &[Span<C>],
    ) -> Matching {
        let mut candidates = self.eligible_pairs(predicted, reference);
        candidates.sort_by(|a, b| {
            b.iou
                .total_cmp(&a.iou)
                .then(a.predicted.cmp(&b.predicted))
                .then(a.reference.cmp(&b.reference))
        });

        let pairs = match self.strategy {
            MatchStrategy::Greedy => greedy(&candidates, predicted.len(), reference.len()),
            MatchStrategy::MaximumCardinality => {
                augmenting(&candidates, predicted.len(), reference.len())
            }
        };

        let matched_p: BTreeSet<usize> = pairs.iter().map(|p| p.predicted).collect();
        let matched_r: BTreeSet<usize> = pairs.iter().map(|p| p.reference).collect();

        Matching {
            unmatched_predicted: (0..predicted.len())
                .filter(|i| !matched_p.contains(i))
                .collect(),
            unmatched_reference: (0..reference.len())
                .filter(|i| !matched_r.contains(i))
                .collect(),
            pairs,
        }
    }

    /// Score one document's predictions against its references.
    pub fn evaluate<C: CoordinateSpace>(
        &self,
        predicted: &[Span<C>],
        reference: &[Span<C>],
    ) -> Evaluation<C> {
        let matching = self.match_indices(predicted, reference);

        debug!(
            predicted = predicted.len(),
            reference = reference.len(),
            matched = matching.pairs.len(),
            strategy = ?self.strategy,
            "Matched predictions against references"
        );

        Evaluation {
            true_positives: matching
                .pairs
                .iter()
                .map(|pair| MatchedPair {
                    predicted: predicted[pair.predicted].clone(),
                    reference: reference[pair.reference].clone(),
                    iou: pair.iou,
                })
                .collect(),
            false_positives: matching
                .unmatched_predicted
                .iter()
                .map(|&i| predicted[i].clone())
                .collect(),
            false_negatives: matching
                .unmatched_reference
                .iter()
                .map(|&i| reference[i].clone())
                .collect(),
        }
    }

    /// Score a corpus keyed by document id.
    ///
    /// Only documents present in `reference` are scored. A reference entry
    /// with no spans still counts, so predictions on it are false positives.
    /// Documents missing from `predicted` contribute only false negatives.
    pub fn evaluate_corpus<C: CoordinateSpace>(
        &self,
        predicted: &BTreeMap<String, Vec<Span<C>>>,
        reference: &BTreeMap<String, Vec<Span<C>>>,
    ) -> EvaluationReport {
        let mut totals: BTreeMap<Label, Counts> = BTreeMap::new();

        for (document_id, r) in reference {
            let p = predicted.get(document_id).map(Vec::as_slice).unwrap_or(&[]);
            for (label, counts) in self.evaluate(p, r).counts_by_label() {
                totals.entry(label).or_default().add(&counts);
            }
        }

        let skipped = predicted.keys().filter(|id| !reference.contains_key(*id)).count();
        if skipped > 0 {
            debug!(skipped, "Ignored predicted documents without references");
        }

        EvaluationReport::from_counts(reference.len(), &totals)
    }
}

/// Take candidates (already sorted by descending IoU) while both ends are free.
fn greedy(candidates: &[IndexPair], n_pred: usize, n_ref: usize) -> Vec<IndexPair> {
    let mut used_p = vec![false; n_pred];
    let mut used_r = vec![false; n_ref];
    let mut pairs = Vec::new();

    for c in candidates {
        if !used_p[c.predicted] && !used_r[c.reference] {
            used_p[c.predicted] = true;
            used_r[c.reference] = true;
            pairs.push(*c);
        }
    }

    pairs
}

/// Maximum-cardinality matching via augmenting paths (Kuhn).
///
/// Adjacency lists keep the candidates' IoU order, so higher-overlap
/// references are tried first.
fn augmenting(candidates: &[IndexPair], n_pred: usize, n_ref: usize) -> Vec<IndexPair> {
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_pred];
    for c in candidates {
        adjacency[c.predicted].push((c.reference, c.iou));
    }

    let mut owner: Vec<Option<usize>> = vec![None; n_ref];

    for p in 0..n_pred {
        let mut visited = vec![false; n_ref];
        try_augment(p, &adjacency, &mut owner, &mut visited);
    }

    let mut pairs: Vec<IndexPair> = owner
        .iter()
        .enumerate()
        .filter_map(|(r, p)| {
            p.map(|p| {
                let overlap = adjacency[p]
                    .iter()
                    .find(|(rr, _)| *rr == r)
                    .map(|(_, v)| *v)
                    .unwrap_or(0.0);
                IndexPair {
                    predicted: p,
                    reference: r,
                    iou: overlap,
                }
            })
        })
        .collect();

    pairs.sort_by(|a, b| a.predicted.cmp(&b.predicted));
    pairs
}

fn try_augment(
    p: usize,
    adjacency: &[Vec<(usize, f64)>],
    owner: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for &(r, _) in &adjacency[p] {
        if visited[r] {
            continue;
        }
        visited[r] = true;

        let free = match owner[r] {
            None => true,
            Some(other) => try_augment(other, adjacency, owner, visited),
        };

        if free {
            owner[r] = Some(p);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::GlobalSpan;
    use proptest::prelude::*;

    fn span(label: Label, start: usize, end: usize) -> GlobalSpan {
        GlobalSpan::new(label, start, end, "")
    }

    #[test]
    fn test_scenario_exact_match() {
        let predicted = vec![span(Label::Ironia, 0, 10)];
        let golden = vec![span(Label::Ironia, 0, 10)];
        let evaluation = Evaluator::default().evaluate(&predicted, &golden);

        let counts = evaluation.counts();
        assert_eq!(counts.true_positives, 1);
        assert_eq!(counts.false_positives, 0);
        assert_eq!(counts.false_negatives, 0);
        assert_eq!(counts.f1(), Score::Defined(1.0));
    }

    #[test]
    fn test_scenario_label_mismatch() {
        let predicted = vec![span(Label::Ironia, 0, 10)];
        let golden = vec![span(Label::Sarcasmo, 0, 10)];
        let evaluation = Evaluator::default().evaluate(&predicted, &golden);

        let counts = evaluation.counts();
        assert_eq!(counts.true_positives, 0);
        assert_eq!(counts.false_positives, 1);
        assert_eq!(counts.false_negatives, 1);

        let report = evaluation.report();
        assert_eq!(report.per_label[&Label::Ironia].counts.false_positives, 1);
        assert_eq!(report.per_label[&Label::Sarcasmo].counts.false_negatives, 1);
    }

    #[test]
    fn test_empty_sets_are_well_defined() {
        let empty: Vec<GlobalSpan> = Vec::new();
        let report = Evaluator::default().evaluate(&empty, &empty).report();
        assert_eq!(report.aggregate.precision, Score::Undefined);
        assert_eq!(report.aggregate.recall, Score::Undefined);
        assert_eq!(report.aggregate.f1, Score::Undefined);
        assert_eq!(report.macro_f1, Score::Undefined);
        assert!(report.per_label.is_empty());

        let golden = vec![span(Label::Metafora, 0, 5)];
        let counts = Evaluator::default().evaluate(&empty, &golden).counts();
        assert_eq!(counts.precision(), Score::Undefined);
        assert_eq!(counts.recall(), Score::Defined(0.0));
        assert_eq!(counts.f1(), Score::Defined(0.0));
    }

    #[test]
    fn test_below_threshold_not_matched() {
        let predicted = vec![span(Label::Metafora, 0, 10)];
        let golden = vec![span(Label::Metafora, 5, 15)];
        let counts = Evaluator::default().evaluate(&predicted, &golden).counts();
        assert_eq!(counts.true_positives, 0);

        let counts = Evaluator::new(0.3).evaluate(&predicted, &golden).counts();
        assert_eq!(counts.true_positives, 1);
    }

    #[test]
    fn test_greedy_prefers_highest_iou() {
        let predicted = vec![span(Label::Anafora, 0, 10), span(Label::Anafora, 1, 10)];
        let golden = vec![span(Label::Anafora, 1, 10)];
        let matching = Evaluator::default().match_indices(&predicted, &golden);
        assert_eq!(matching.pairs.len(), 1);
        assert_eq!(matching.pairs[0].predicted, 1);
        assert_eq!(matching.unmatched_predicted, vec![0]);
    }

    #[test]
    fn test_maximum_cardinality_beats_greedy() {
        // p0 overlaps r0 best and r1 acceptably; p1 only overlaps r0.
        let predicted = vec![span(Label::Metafora, 0, 10), span(Label::Metafora, 0, 7)];
        let golden = vec![span(Label::Metafora, 0, 10), span(Label::Metafora, 2, 12)];

        let greedy = Evaluator::default().match_indices(&predicted, &golden);
        let optimal = Evaluator::default()
            .with_strategy(MatchStrategy::MaximumCardinality)
            .match_indices(&predicted, &golden);

        assert_eq!(greedy.pairs.len(), 1);
        assert_eq!(optimal.pairs.len(), 2);
    }

    #[test]
    fn test_score_serializes_null_when_undefined() {
        assert_eq!(serde_json::to_string(&Score::Undefined).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Score::Defined(0.5)).unwrap(), "0.5");
        assert_eq!(Score::Undefined.to_string(), "undefined");
        assert_eq!(Score::Undefined.value_or_zero(), 0.0);
    }

    #[test]
    fn test_corpus_sums_documents() {
        let mut predicted = BTreeMap::new();
        predicted.insert("a".to_string(), vec![span(Label::Ironia, 0, 10)]);
        predicted.insert("b".to_string(), vec![span(Label::Ironia, 0, 10)]);

        let mut golden = BTreeMap::new();
        golden.insert("a".to_string(), vec![span(Label::Ironia, 0, 10)]);
        golden.insert("b".to_string(), vec![]);
        golden.insert("c".to_string(), vec![span(Label::Metafora, 0, 10)]);

        let report = Evaluator::default().evaluate_corpus(&predicted, &golden);
        assert_eq!(report.documents, 3);
        assert_eq!(report.aggregate.counts.true_positives, 1);
        // "b" is golden with no spans, so its prediction is a false positive
        assert_eq!(report.aggregate.counts.false_positives, 1);
        assert_eq!(report.aggregate.counts.false_negatives, 1);
        assert_eq!(report.aggregate.precision, Score::Defined(0.5));
        assert_eq!(report.per_label[&Label::Metafora].f1, Score::Defined(0.0));
        // ironia f1 = 2/3, metafora f1 = 0
        let macro_f1 = report.macro_f1.value().unwrap();
        assert!((macro_f1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_corpus_ignores_documents_without_references() {
        let mut predicted = BTreeMap::new();
        predicted.insert("a".to_string(), vec![span(Label::Ironia, 0, 10)]);
        predicted.insert(
            "b".to_string(),
            vec![
                span(Label::Ironia, 0, 10),
                span(Label::Ironia, 0, 10),
                span(Label::Ironia, 0, 10),
            ],
        );

        let mut golden = BTreeMap::new();
        golden.insert("a".to_string(), vec![span(Label::Ironia, 0, 10)]);

        let report = Evaluator::default().evaluate_corpus(&predicted, &golden);
        assert_eq!(report.documents, 1);
        assert_eq!(report.aggregate.counts.true_positives, 1);
        assert_eq!(report.aggregate.counts.false_positives, 0);
        assert_eq!(report.aggregate.counts.false_negatives, 0);
        assert_eq!(report.aggregate.precision, Score::Defined(1.0));
    }

    fn arb_spans() -> impl Strategy<Value = Vec<GlobalSpan>> {
        prop::collection::vec(
            (
                prop::sample::select(vec![Label::Ironia, Label::Metafora]),
                0usize..100,
                1usize..30,
            ),
            0..15,
        )
        .prop_map(|items| {
            items
                .into_iter()
                .map(|(label, start, len)| span(label, start, start + len))
                .collect()
        })
    }

    fn assert_valid_matching(
        m: &Matching,
        predicted: &[GlobalSpan],
        reference: &[GlobalSpan],
        threshold: f64,
    ) -> Result<(), TestCaseError> {
        let mut seen_p = BTreeSet::new();
        let mut seen_r = BTreeSet::new();
        for pair in &m.pairs {
            prop_assert!(seen_p.insert(pair.predicted));
            prop_assert!(seen_r.insert(pair.reference));
            let (p, r) = (&predicted[pair.predicted], &reference[pair.reference]);
            prop_assert_eq!(p.label, r.label);
            prop_assert!(iou(p, r) >= threshold);
        }
        prop_assert_eq!(m.pairs.len() + m.unmatched_predicted.len(), predicted.len());
        prop_assert_eq!(m.pairs.len() + m.unmatched_reference.len(), reference.len());
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_greedy_matching_is_bijection(p in arb_spans(), r in arb_spans()) {
            let e = Evaluator::default();
            let m = e.match_indices(&p, &r);
            assert_valid_matching(&m, &p, &r, e.threshold())?;
        }

        #[test]
        fn prop_max_cardinality_is_bijection_and_not_smaller(p in arb_spans(), r in arb_spans()) {
            let e = Evaluator::default().with_strategy(MatchStrategy::MaximumCardinality);
            let m = e.match_indices(&p, &r);
            assert_valid_matching(&m, &p, &r, e.threshold())?;

            let g = Evaluator::default().match_indices(&p, &r);
            prop_assert!(m.pairs.len() >= g.pairs.len());
        }

        #[test]
        fn prop_scores_never_nan(p in arb_spans(), r in arb_spans()) {
            let report = Evaluator::default().evaluate(&p, &r).report();
            for s in [report.aggregate.precision, report.aggregate.recall, report.aggregate.f1, report.macro_f1] {
                if let Some(v) = s.value() {
                    prop_assert!(v.is_finite() && (0.0..=1.0).contains(&v));
                }
            }
        }
    }
}
