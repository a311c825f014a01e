//! Plain-text tables for terminal output.

use figuras_core::{EvaluationReport, LabelScores};
use figuras_runtime::budget::{CostReport, CostSummary};
use figuras_runtime::sample::StratumCount;
use std::fmt::Write;

fn score_row(out: &mut String, name: &str, scores: &LabelScores) {
    let _ = writeln!(
        out,
        "{:<20} {:>5} {:>5} {:>5} {:>10} {:>10} {:>10}",
        name,
        scores.counts.true_positives,
        scores.counts.false_positives,
        scores.counts.false_negatives,
        scores.precision.to_string(),
        scores.recall.to_string(),
        scores.f1.to_string(),
    );
}

/// Per-label table followed by micro and macro averages.
pub fn evaluation(report: &EvaluationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Documents: {}", report.documents);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<20} {:>5} {:>5} {:>5} {:>10} {:>10} {:>10}",
        "label", "tp", "fp", "fn", "precision", "recall", "f1"
    );
    let _ = writeln!(out, "{}", "-".repeat(71));

    for (label, scores) in &report.per_label {
        score_row(&mut out, label.as_str(), scores);
    }

    let _ = writeln!(out, "{}", "-".repeat(71));
    score_row(&mut out, "micro", &report.aggregate);
    let _ = writeln!(out, "{:<20} {:>50}", "macro f1", report.macro_f1.to_string());
    out
}

fn cost_row(out: &mut String, name: &str, summary: &CostSummary) {
    let _ = writeln!(
        out,
        "{:<10} {:>9} {:>13} {:>13} {:>13} {:>11.4} {:>11.4} {:>11.4}",
        name,
        summary.requests,
        summary.text_tokens,
        summary.input_tokens,
        summary.output_tokens,
        summary.input_cost,
        summary.output_cost,
        summary.total_cost,
    );
}

/// Cost estimate by year. Amounts are in USD.
pub fn costs(report: &CostReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:>9} {:>13} {:>13} {:>13} {:>11} {:>11} {:>11}",
        "year", "speeches", "text tokens", "input tokens", "output tok.", "input $", "output $", "total $"
    );
    let _ = writeln!(out, "{}", "-".repeat(99));

    for (year, summary) in &report.by_year {
        cost_row(&mut out, &year.to_string(), summary);
    }
    if report.undated.requests > 0 {
        cost_row(&mut out, "undated", &report.undated);
    }

    let _ = writeln!(out, "{}", "-".repeat(99));
    cost_row(&mut out, "total", &report.total);
    out
}

/// Available and sampled speeches per stratum.
pub fn strata(counts: &[StratumCount]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:>10} {:>10}", "stratum", "available", "sampled");
    let _ = writeln!(out, "{}", "-".repeat(42));
    for c in counts {
        let _ = writeln!(out, "{:<20} {:>10} {:>10}", c.stratum, c.available, c.sampled);
    }
    let _ = writeln!(out, "{}", "-".repeat(42));
    let _ = writeln!(
        out,
        "{:<20} {:>10} {:>10}",
        "total",
        counts.iter().map(|c| c.available).sum::<usize>(),
        counts.iter().map(|c| c.sampled).sum::<usize>(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use figuras_core::{Counts, Label};
    use figuras_runtime::budget::{CostEstimate, PriceTable};
    use std::collections::BTreeMap;

    #[test]
    fn test_evaluation_table() {
        let mut counts = BTreeMap::new();
        counts.insert(
            Label::Metafora,
            Counts {
                true_positives: 1,
                false_positives: 1,
                false_negatives: 0,
            },
        );
        counts.insert(
            Label::Sarcasmo,
            Counts {
                true_positives: 0,
                false_positives: 0,
                false_negatives: 1,
            },
        );
        let report = EvaluationReport::from_counts(2, &counts);
        let table = evaluation(&report);

        assert!(table.starts_with("Documents: 2"));
        assert!(table.contains("metafora"));
        assert!(table.contains("sarcasmo"));
        assert!(table.contains("undefined"));
        assert!(table.contains("micro"));
        assert!(table.contains("macro f1"));
    }

    #[test]
    fn test_cost_table() {
        let price = *PriceTable::default().get("gpt-5").unwrap();
        let estimate = CostEstimate::from_tokens(&price, 1000, 20, 500, true);
        let mut report = CostReport::default();
        report.add(Some(2019), &estimate);
        report.add(None, &estimate);

        let table = costs(&report);
        assert!(table.contains("2019"));
        assert!(table.contains("undated"));
        assert!(table.lines().last().unwrap().starts_with("total"));
    }

    #[test]
    fn test_strata_table() {
        let counts = vec![
            StratumCount {
                stratum: "2019".to_string(),
                available: 40,
                sampled: 4,
            },
            StratumCount {
                stratum: "2020".to_string(),
                available: 7,
                sampled: 1,
            },
        ];
        let table = strata(&counts);
        assert!(table.contains("2019"));
        let total = table.lines().last().unwrap();
        assert!(total.starts_with("total"));
        assert!(total.ends_with(" 5"));
    }
}
