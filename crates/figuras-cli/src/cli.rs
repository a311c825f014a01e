//! Command-line interface for figuras.
//!
//! Builds batch request files from speeches, reconciles batch output into
//! span records, and scores records against a golden set.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use figuras_core::record::{index_golden, index_records};
use figuras_core::remap::RejectedSpan;
use figuras_core::{iou, GlobalSpan, GoldenDocument, Label, MatchStrategy, SpanRecord};
use figuras_runtime::batch::{self, FailedLine};
use figuras_runtime::io::{read_jsonl, read_jsonl_file, write_jsonl_file};
use figuras_runtime::pipeline::UnmatchedAnnotation;
use figuras_runtime::{
    BatchJob, CostBudget, JobStatus, RequestBuilder, RuntimeConfig, SampleConfig, Sampler,
    SpeechDocument,
};

use crate::table;

/// figuras - rhetorical-figure annotation batches and span evaluation
#[derive(Parser, Debug)]
#[command(name = "figuras")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (YAML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a batch request file from speeches
    Requests {
        /// Speeches JSONL ({document_id, text, date?, speaker?, party?})
        #[arg(short, long)]
        input: PathBuf,

        /// Batch request JSONL to write
        #[arg(short, long)]
        output: PathBuf,

        /// Only consider the first N speeches
        #[arg(long)]
        limit: Option<usize>,

        /// Model name (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Truncate each request text to N characters (overrides config)
        #[arg(long)]
        max_chars: Option<usize>,

        /// Stop adding speeches once this many USD are estimated (overrides config)
        #[arg(long)]
        max_usd: Option<f64>,
    },

    /// Turn batch output into deduplicated span records
    Reconcile {
        /// Speeches JSONL the requests were built from
        #[arg(short, long)]
        speeches: PathBuf,

        /// Batch output JSONL
        #[arg(short, long)]
        batch_output: PathBuf,

        /// Span records JSONL to write
        #[arg(short, long)]
        output: PathBuf,

        /// Write failed lines, rejected spans and unmatched annotations here
        #[arg(long)]
        problems: Option<PathBuf>,
    },

    /// Score span records against a golden set
    Evaluate {
        /// Span records JSONL
        #[arg(short, long)]
        predicted: PathBuf,

        /// Golden documents (JSON array or JSONL)
        #[arg(short, long)]
        golden: PathBuf,

        /// Minimum IoU for a match (overrides config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Matching strategy (overrides config)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Intersection over union of two character intervals
    Iou {
        #[arg(long)]
        a_start: usize,
        #[arg(long)]
        a_end: usize,
        #[arg(long)]
        b_start: usize,
        #[arg(long)]
        b_end: usize,
    },

    /// Estimate token usage and cost of a batch, by year
    Estimate {
        /// Speeches JSONL
        #[arg(short, long)]
        input: PathBuf,

        /// Print the estimate as JSON
        #[arg(long)]
        json: bool,
    },

    /// Draw a seeded sample of eligible speeches, stratified by party or year
    Sample {
        /// Speeches JSONL
        #[arg(short, long)]
        input: PathBuf,

        /// Sampled speeches JSONL to write
        #[arg(short, long)]
        output: PathBuf,

        /// Grouping (overrides config)
        #[arg(long, value_enum)]
        by: Option<StratumArg>,

        /// Share of each group; values above 1 are percentages (overrides config)
        #[arg(long)]
        fraction: Option<f64>,

        /// Random seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Replay polled batch statuses and report where the job stands
    Job {
        /// Status snapshots JSONL ({id, status, output_file_id?, at?})
        #[arg(short, long)]
        events: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Descending IoU, first come first served
    Greedy,

    /// Maximum number of matched pairs
    Maximum,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StratumArg {
    /// 1% of each party, rounded up
    Party,

    /// 10% of each year, rounded down
    Year,
}

impl From<StrategyArg> for MatchStrategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Greedy => MatchStrategy::Greedy,
            StrategyArg::Maximum => MatchStrategy::MaximumCardinality,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let mut config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Requests {
                input,
                output,
                limit,
                model,
                max_chars,
                max_usd,
            } => {
                if let Some(model) = model {
                    config.batch.model = model;
                }
                if max_chars.is_some() {
                    config.batch.max_chars = max_chars;
                }
                if max_usd.is_some() {
                    config.budget.max_usd = max_usd;
                }
                config.validate().context("Invalid settings")?;
                build_requests(&config, &input, &output, limit)
            }
            Commands::Reconcile {
                speeches,
                batch_output,
                output,
                problems,
            } => reconcile(&config, &speeches, &batch_output, &output, problems.as_deref()),
            Commands::Evaluate {
                predicted,
                golden,
                threshold,
                strategy,
                json,
            } => {
                if let Some(threshold) = threshold {
                    config.engine.match_threshold = threshold;
                }
                if let Some(strategy) = strategy {
                    config.engine.match_strategy = strategy.into();
                }
                config.validate().context("Invalid settings")?;
                evaluate(&config, &predicted, &golden, json)
            }
            Commands::Iou {
                a_start,
                a_end,
                b_start,
                b_end,
            } => {
                println!("{:.4}", interval_iou(a_start, a_end, b_start, b_end));
                Ok(())
            }
            Commands::Estimate { input, json } => estimate(&config, &input, json),
            Commands::Sample {
                input,
                output,
                by,
                fraction,
                seed,
            } => {
                if let Some(by) = by {
                    config.sample = match by {
                        StratumArg::Party => SampleConfig::by_party(),
                        StratumArg::Year => SampleConfig::by_year(),
                    };
                }
                if let Some(fraction) = fraction {
                    config.sample.fraction = fraction;
                }
                if let Some(seed) = seed {
                    config.sample.seed = seed;
                }
                config.validate().context("Invalid settings")?;
                sample(&config, &input, &output)
            }
            Commands::Job { events } => replay_job(&events),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn read_speeches(path: &Path) -> Result<Vec<SpeechDocument>> {
    read_jsonl_file(path).with_context(|| format!("Failed to read speeches: {}", path.display()))
}

/// Build the batch request file.
fn build_requests(
    config: &RuntimeConfig,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
) -> Result<()> {
    let mut speeches = read_speeches(input)?;
    if let Some(limit) = limit {
        speeches.truncate(limit);
    }

    let price = config.model_price()?;
    let builder = RequestBuilder::new(config.batch.clone());
    let budget = CostBudget::new(config.budget.max_usd);

    let batch = config.pipeline().prepare_requests(
        &speeches,
        &builder,
        &price,
        config.budget.output_tokens_per_request,
        config.budget.prompt_cached,
        &budget,
    );

    write_jsonl_file(output, &batch.requests)
        .with_context(|| format!("Failed to write requests: {}", output.display()))?;

    eprintln!(
        "[{} requests for {} speeches written to {}; {} too short, {} over budget; estimated ${:.4}]",
        batch.requests.len(),
        speeches.len() - batch.ineligible.len() - batch.over_budget.len(),
        output.display(),
        batch.ineligible.len(),
        batch.over_budget.len(),
        budget.spent(),
    );

    Ok(())
}

/// Anything that kept part of the batch output from becoming a record.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Problem<'a> {
    FailedLine(&'a FailedLine),
    RejectedSpan(&'a RejectedSpan),
    Unmatched(&'a UnmatchedAnnotation),
}

/// Reconcile batch output into span records.
fn reconcile(
    config: &RuntimeConfig,
    speeches: &Path,
    batch_output: &Path,
    output: &Path,
    problems: Option<&Path>,
) -> Result<()> {
    let documents = read_speeches(speeches)?;

    let file = File::open(batch_output)
        .with_context(|| format!("Failed to open batch output: {}", batch_output.display()))?;
    let parsed = batch::parse_output(BufReader::new(file))
        .with_context(|| format!("Failed to read batch output: {}", batch_output.display()))?;
    let (annotations, failures) = batch::partition(parsed);

    let result = config.pipeline().reconcile(&documents, annotations);

    write_jsonl_file(output, &result.records)
        .with_context(|| format!("Failed to write records: {}", output.display()))?;

    if let Some(path) = problems {
        let all: Vec<Problem<'_>> = failures
            .iter()
            .map(Problem::FailedLine)
            .chain(result.rejected.iter().map(Problem::RejectedSpan))
            .chain(result.unmatched.iter().map(Problem::Unmatched))
            .collect();
        write_jsonl_file(path, &all)
            .with_context(|| format!("Failed to write problems: {}", path.display()))?;
    }

    eprintln!(
        "[{} records written to {}; {} failed lines, {} rejected spans, {} unmatched annotations]",
        result.records.len(),
        output.display(),
        failures.len(),
        result.rejected.len(),
        result.unmatched.len(),
    );

    Ok(())
}

/// Golden files come either as a JSON array or as JSON Lines.
fn read_golden(path: &Path) -> Result<Vec<GoldenDocument>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read golden set: {}", path.display()))?;

    if contents.trim_start().starts_with('[') {
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse golden set: {}", path.display()))
    } else {
        read_jsonl(contents.as_bytes())
            .with_context(|| format!("Failed to parse golden set: {}", path.display()))
    }
}

/// Score predictions against the golden set.
fn evaluate(config: &RuntimeConfig, predicted: &Path, golden: &Path, json: bool) -> Result<()> {
    let records: Vec<SpanRecord> = read_jsonl_file(predicted)
        .with_context(|| format!("Failed to read predictions: {}", predicted.display()))?;
    let reference = index_golden(read_golden(golden)?);
    let predicted = index_records(records);

    info!(
        predicted_documents = predicted.len(),
        golden_documents = reference.len(),
        "Evaluating"
    );

    let report = config
        .pipeline()
        .engine()
        .evaluate_corpus(&predicted, &reference);

    if json {
        serde_json::to_writer_pretty(io::stdout().lock(), &report)
            .context("Failed to write report")?;
        println!();
    } else {
        print!("{}", table::evaluation(&report));
    }

    Ok(())
}

fn interval_iou(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> f64 {
    let a = GlobalSpan::new(Label::Metafora, a_start, a_end, "");
    let b = GlobalSpan::new(Label::Metafora, b_start, b_end, "");
    iou(&a, &b)
}

/// Estimate what a batch built from `input` would cost.
fn estimate(config: &RuntimeConfig, input: &Path, json: bool) -> Result<()> {
    let speeches = read_speeches(input)?;
    let price = config.model_price()?;
    let builder = RequestBuilder::new(config.batch.clone());
    let budget = CostBudget::unlimited();

    let batch = config.pipeline().prepare_requests(
        &speeches,
        &builder,
        &price,
        config.budget.output_tokens_per_request,
        config.budget.prompt_cached,
        &budget,
    );
    let report = budget.report();

    if json {
        serde_json::to_writer_pretty(io::stdout().lock(), &report)
            .context("Failed to write estimate")?;
        println!();
    } else {
        print!("{}", table::costs(&report));
        println!(
            "\n{} speeches skipped (at most {} words)",
            batch.ineligible.len(),
            config.budget.min_words
        );
        if let Some(max) = config.budget.max_usd {
            println!("Configured cap: ${:.2}", max);
        }
    }

    Ok(())
}

/// Write a stratified sample of the eligible speeches.
fn sample(config: &RuntimeConfig, input: &Path, output: &Path) -> Result<()> {
    let speeches = read_speeches(input)?;
    let pipeline = config.pipeline();
    let eligible: Vec<SpeechDocument> = speeches
        .into_iter()
        .filter(|s| pipeline.is_eligible(s))
        .collect();

    let sample = Sampler::new(config.sample.clone()).sample(&eligible);

    write_jsonl_file(output, &sample.documents)
        .with_context(|| format!("Failed to write sample: {}", output.display()))?;

    print!("{}", table::strata(&sample.strata));
    eprintln!(
        "[{} of {} eligible speeches written to {}; {} without a {:?}]",
        sample.documents.len(),
        eligible.len(),
        output.display(),
        sample.skipped,
        config.sample.by,
    );

    Ok(())
}

/// One polled status of a batch.
#[derive(Debug, Deserialize)]
struct StatusSnapshot {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

fn replay_job(events: &Path) -> Result<()> {
    let snapshots: Vec<StatusSnapshot> = read_jsonl_file(events)
        .with_context(|| format!("Failed to read status snapshots: {}", events.display()))?;
    let job = replay(snapshots)?;

    println!("Batch: {}", job.id);
    println!("Status: {}", job.status());
    for change in job.history() {
        println!("  {}  {}", change.at.to_rfc3339(), change.status);
    }
    if job.output_ready() {
        if let Some(file_id) = &job.output_file_id {
            println!("Output file: {}", file_id);
        }
    } else if job.is_done() {
        println!("Finished without output");
    } else {
        println!("Still running");
    }

    Ok(())
}

fn replay(snapshots: Vec<StatusSnapshot>) -> Result<BatchJob> {
    let mut snapshots = snapshots.into_iter();
    let first = snapshots
        .next()
        .context("No status snapshots to replay")?;

    let mut job = BatchJob::at(first.id.clone(), first.at.unwrap_or_else(Utc::now));
    for snapshot in std::iter::once(first).chain(snapshots) {
        if snapshot.id != job.id {
            anyhow::bail!("Snapshot for batch {} in history of {}", snapshot.id, job.id);
        }
        let status: JobStatus = snapshot.status.parse()?;
        job.observe(status, snapshot.at.unwrap_or_else(Utc::now))?;
        if snapshot.output_file_id.is_some() {
            job.output_file_id = snapshot.output_file_id;
        }
    }

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn snapshot(status: &str, output: Option<&str>) -> StatusSnapshot {
        StatusSnapshot {
            id: "batch_1".to_string(),
            status: status.to_string(),
            output_file_id: output.map(str::to_string),
            at: None,
        }
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "figuras", "evaluate", "-p", "spans.jsonl", "-g", "golden.json", "--json",
            "--strategy", "maximum", "--config", "figuras.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("figuras.yaml")));
        match cli.command {
            Commands::Evaluate { json, strategy, .. } => {
                assert!(json);
                assert!(matches!(strategy, Some(StrategyArg::Maximum)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_interval_iou() {
        assert!((interval_iou(0, 10, 5, 15) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(interval_iou(0, 5, 5, 10), 0.0);
    }

    #[test]
    fn test_replay_job() {
        let job = replay(vec![
            snapshot("validating", None),
            snapshot("in_progress", None),
            snapshot("in_progress", None),
            snapshot("completed", Some("file_7")),
        ])
        .unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.output_ready());
        assert_eq!(job.history().len(), 3);

        assert!(replay(vec![snapshot("completed", None), snapshot("in_progress", None)]).is_err());
        assert!(replay(vec![snapshot("paused", None)]).is_err());
        assert!(replay(Vec::new()).is_err());
    }

    #[test]
    fn test_read_golden_both_formats() {
        let doc = r#"{"document_id": "1", "spans": [{"label": "sarcasmo", "start_char": 0, "end_char": 4, "text": "ótimo", "confidence": 1.0}]}"#;

        let mut array = tempfile::NamedTempFile::new().unwrap();
        write!(array, "[{}]", doc).unwrap();
        let docs = read_golden(array.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].spans[0].label, Label::Sarcasmo);

        let mut lines = tempfile::NamedTempFile::new().unwrap();
        write!(lines, "{}\n{}\n", doc, doc).unwrap();
        assert_eq!(read_golden(lines.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_read_golden_label_and_offsets_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"document_id": "9", "spans": [{{"label": "ironia", "start_char": 3, "end_char": 9}}]}}, {{"document_id": "10"}}]"#
        )
        .unwrap();

        let docs = read_golden(file.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].spans[0].confidence, 1.0);
        assert!(docs[0].spans[0].text.is_empty());
        assert!(docs[1].spans.is_empty());
    }

    #[test]
    fn test_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let speeches = dir.path().join("speeches.jsonl");
        let sampled = dir.path().join("sample.jsonl");

        let long = "o senado precisa votar hoje ".repeat(3);
        let mut lines = String::new();
        for i in 0..120 {
            let party = if i < 110 { "PT" } else { "PL" };
            lines.push_str(&format!(
                "{}\n",
                serde_json::json!({"document_id": i, "text": long, "party": party})
            ));
        }
        lines.push_str(&format!(
            "{}\n",
            serde_json::json!({"document_id": 999, "text": "curto", "party": "NOVO"})
        ));
        fs::write(&speeches, lines).unwrap();

        let mut config = RuntimeConfig::default();
        config.budget.min_words = 5;
        sample(&config, &speeches, &sampled).unwrap();

        let written: Vec<SpeechDocument> = read_jsonl_file(&sampled).unwrap();
        // PT: ceil(1.1) = 2, PL: 1, the short NOVO speech is not eligible
        assert_eq!(written.len(), 3);
        assert_eq!(written.iter().filter(|s| s.party.as_deref() == Some("PT")).count(), 2);
        assert!(written.iter().all(|s| s.document_id != "999"));
    }

    #[test]
    fn test_requests_and_reconcile_files() {
        let dir = tempfile::tempdir().unwrap();
        let speeches = dir.path().join("speeches.jsonl");
        let requests = dir.path().join("requests.jsonl");
        let output = dir.path().join("output.jsonl");
        let records = dir.path().join("records.jsonl");
        let problems = dir.path().join("problems.jsonl");

        let text = format!("Este país é um barco à deriva. {}", "palavra ".repeat(10));
        fs::write(
            &speeches,
            format!(
                "{}\n",
                serde_json::json!({"document_id": 77, "text": text, "date": "2021-04-01"})
            ),
        )
        .unwrap();

        let mut config = RuntimeConfig::default();
        config.budget.min_words = 5;
        build_requests(&config, &speeches, &requests, None).unwrap();
        let written = fs::read_to_string(&requests).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("\"custom_id\":\"disc-77\""));

        let good = serde_json::json!({
            "custom_id": "disc-77",
            "response": {"output": [{"content": [{"type": "output_json", "json": {"spans": [
                {"label": "metafora", "start_char": 12, "end_char": 29, "text": "um barco à deriva",
                 "rationale": null, "cues": [], "confidence": 0.9},
                {"label": "ironia", "start_char": 5, "end_char": 2, "text": "",
                 "rationale": null, "cues": [], "confidence": 0.9}
            ]}}]}]}
        });
        fs::write(&output, format!("{}\nnot json\n", good)).unwrap();

        reconcile(&config, &speeches, &output, &records, Some(&problems)).unwrap();

        let written: Vec<SpanRecord> = read_jsonl_file(&records).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].year, Some(2021));
        assert_eq!(written[0].span.start_char, 12);

        let problems = fs::read_to_string(&problems).unwrap();
        assert_eq!(problems.lines().count(), 2);
        assert!(problems.contains("\"kind\":\"failed_line\""));
        assert!(problems.contains("\"kind\":\"rejected_span\""));
    }
}
