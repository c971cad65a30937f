use crate::jsonl::{JsonlReader, Line, parse_line};
use crate::record::{Payload, movie_details, prefix_chars, preview, truthy, value_text};
use crate::tokens::TokenCounter;
use crate::{logi, logok, logw};
use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

const MALFORMED_PREVIEW: usize = 120;
const SIGNATURE_CHARS: usize = 200;
const SAMPLE_COUNT: usize = 5;
const SAMPLE_PREVIEW: usize = 180;

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    #[arg(long = "in", default_value = "finetuning_generation_dataset.jsonl")]
    pub input: PathBuf,
    /// Also report token lengths: Hub model id, local tokenizer.json, or `estimate`
    #[arg(long)]
    pub tokenizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthSummary {
    pub median: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStats {
    pub count: usize,
    pub median: usize,
    pub mean: usize,
    pub p90: usize,
    pub p95: usize,
    pub max: usize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationReport {
    pub records: usize,
    pub malformed: usize,
    pub missing_keys: usize,
    pub empty_outputs: usize,
    pub duplicates: usize,
    pub input_chars: Option<LengthSummary>,
    pub output_chars: Option<LengthSummary>,
    pub genres: Vec<(String, usize)>,
    pub samples: Vec<Sample>,
    pub tokens: Option<TokenStats>,
}

/// Median of `values` (mean of the middle pair for even counts).
pub fn median(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    })
}

pub fn mean(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<usize>() as f64 / values.len() as f64)
}

fn summarize(values: &[usize]) -> Option<LengthSummary> {
    Some(LengthSummary {
        median: median(values)?,
        mean: mean(values)?,
    })
}

impl TokenStats {
    pub fn from_lengths(lengths: &[usize]) -> Option<Self> {
        if lengths.is_empty() {
            return None;
        }
        let mut sorted = lengths.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let percentile = |p: f64| sorted[((p * n as f64).floor() as usize).min(n - 1)];
        Some(Self {
            count: n,
            median: median(&sorted)? as usize,
            mean: mean(&sorted)? as usize,
            p90: percentile(0.90),
            p95: percentile(0.95),
            max: *sorted.last()?,
        })
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn genre_of(input: &str) -> Option<String> {
    let Payload::Object(payload) = Payload::parse(input) else {
        return None;
    };
    let details = movie_details(&payload).filter(|d| !d.is_empty())?;
    Some(
        details
            .get("genre")
            .filter(|g| truthy(g))
            .map(value_text)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
    )
}

#[derive(Default)]
pub struct Inspector {
    report: ValidationReport,
    input_lens: Vec<usize>,
    output_lens: Vec<usize>,
    token_lens: Vec<usize>,
    signatures: HashSet<String>,
    genre_index: HashMap<String, usize>,
}

impl Inspector {
    pub fn malformed(&mut self, raw: &str) {
        logw(format!("Malformed JSON line (skipping): {}", preview(raw.trim(), MALFORMED_PREVIEW)));
        self.report.malformed += 1;
    }

    pub fn record(&mut self, obj: &Map<String, Value>, counter: Option<&dyn TokenCounter>) {
        let report = &mut self.report;
        report.records += 1;

        let has = |key: &str| obj.get(key).map(|v| !v.is_null()).unwrap_or(false);
        if !(has("instruction") && has("input") && has("output")) {
            report.missing_keys += 1;
        }

        let input = str_field(obj, "input").unwrap_or_default();
        let output = str_field(obj, "output").unwrap_or_default();
        if output.trim().is_empty() {
            report.empty_outputs += 1;
        }

        self.input_lens.push(input.chars().count());
        self.output_lens.push(output.chars().count());

        let sig = format!(
            "{}||{}",
            prefix_chars(input, SIGNATURE_CHARS),
            prefix_chars(output, SIGNATURE_CHARS)
        );
        if !self.signatures.insert(sig) {
            report.duplicates += 1;
        }

        if let Some(genre) = genre_of(input) {
            match self.genre_index.get(&genre) {
                Some(&i) => report.genres[i].1 += 1,
                None => {
                    self.genre_index.insert(genre.clone(), report.genres.len());
                    report.genres.push((genre, 1));
                }
            }
        }

        if report.samples.len() < SAMPLE_COUNT {
            report.samples.push(Sample {
                input: preview(input, SAMPLE_PREVIEW),
                output: preview(output, SAMPLE_PREVIEW),
            });
        }

        if let Some(counter) = counter {
            self.token_lens.push(counter.count(&format!("{input}\n{output}")));
        }
    }

    pub fn finish(mut self) -> ValidationReport {
        self.report.input_chars = summarize(&self.input_lens);
        self.report.output_chars = summarize(&self.output_lens);
        self.report.tokens = TokenStats::from_lengths(&self.token_lens);
        self.report
    }
}

pub async fn run(args: &ValidateArgs, counter: Option<&dyn TokenCounter>) -> Result<ValidationReport> {
    let mut reader = JsonlReader::open(&args.input).await?;
    let mut inspector = Inspector::default();
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} lines") {
        bar.set_style(style);
    }

    while let Some((_, raw)) = reader.next_raw().await? {
        bar.inc(1);
        match parse_line::<Value>(&raw) {
            Line::Blank => {}
            Line::Record(Value::Object(obj)) => inspector.record(&obj, counter),
            Line::Record(_) | Line::Malformed(_) => inspector.malformed(&String::from_utf8_lossy(&raw)),
        }
    }
    bar.finish_and_clear();

    let report = inspector.finish();
    log_report(&report);
    Ok(report)
}

fn log_report(report: &ValidationReport) {
    logok(format!("Total records: {}", report.records));
    logi(format!(
        "Malformed: {}. Missing keys: {}. Empty outputs: {}. Duplicate (approx) signatures: {}",
        report.malformed, report.missing_keys, report.empty_outputs, report.duplicates
    ));
    if let (Some(i), Some(o)) = (report.input_chars, report.output_chars) {
        logi(format!("Input chars: median {} mean {}", i.median, i.mean.round()));
        logi(format!("Output chars: median {} mean {}", o.median, o.mean.round()));
    }
    let genres: Vec<String> = report.genres.iter().take(10).map(|(g, c)| format!("{g}={c}")).collect();
    logi(format!("Genres: {}", genres.join(", ")));
    for sample in &report.samples {
        logi(format!("- {}...\n  -> output preview: {}...", sample.input, sample.output));
    }
    if let Some(t) = report.tokens {
        logi(format!(
            "N samples: {}. Median tokens: {}. Mean tokens: {}. 90th pct: {} 95th pct: {} max: {}",
            t.count, t.median, t.mean, t.p90, t.p95, t.max
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::CharEstimate;

    #[test]
    fn median_and_mean_follow_statistics_module() {
        assert_eq!(median(&[3, 1, 2]), Some(2.0));
        assert_eq!(median(&[4, 1, 2, 3]), Some(2.5));
        assert_eq!(median(&[]), None);
        assert_eq!(mean(&[1, 2]), Some(1.5));
    }

    #[test]
    fn percentiles_index_sorted_lengths() {
        let lengths: Vec<usize> = (1..=20).rev().collect();
        let stats = TokenStats::from_lengths(&lengths).unwrap();
        assert_eq!(stats.count, 20);
        assert_eq!(stats.p90, 19);
        assert_eq!(stats.p95, 20);
        assert_eq!(stats.max, 20);
        assert_eq!(stats.median, 10);
        assert_eq!(TokenStats::from_lengths(&[]), None);
    }

    #[test]
    fn genre_requires_nonempty_details() {
        assert_eq!(genre_of(r#"{"movie_details":{"genre":"Drama"}}"#).as_deref(), Some("Drama"));
        assert_eq!(genre_of(r#"{"movie_details":{"genre":""}}"#).as_deref(), Some("UNKNOWN"));
        assert_eq!(genre_of(r#"{"movie_details":{}}"#), None);
        assert_eq!(genre_of("plain"), None);
    }

    #[tokio::test]
    async fn run_counts_problems() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.jsonl");
        let lines = [
            r#"{"instruction":"i","input":"{\"movie_details\":{\"genre\":\"Horror\"}}","output":"Scene one"}"#,
            r#"{"instruction":"i","input":"{\"movie_details\":{\"genre\":\"Horror\"}}","output":"Scene one"}"#,
            r#"{"input":"x","output":"  "}"#,
            "",
            "{broken",
            "[1, 2]",
            r#"{"instruction":"i","input":"{\"movie_details\":{\"genre\":\"Drama\"}}","output":"Another"}"#,
        ];
        std::fs::write(&input, lines.join("\n")).unwrap();

        let args = ValidateArgs { input, tokenizer: None };
        let counter = CharEstimate;
        let report = run(&args, Some(&counter)).await.unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.missing_keys, 1);
        assert_eq!(report.empty_outputs, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(
            report.genres,
            vec![("Horror".to_string(), 2), ("Drama".to_string(), 1)]
        );
        assert_eq!(report.samples.len(), 4);
        assert_eq!(report.output_chars.unwrap().median, 8.0);
        assert_eq!(report.tokens.unwrap().count, 4);
    }

    #[tokio::test]
    async fn invalid_utf8_line_counts_as_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.jsonl");
        let mut bytes = br#"{"instruction":"i","input":"x","output":"ok"}"#.to_vec();
        bytes.extend_from_slice(b"\r\n{\"input\":\"\xff\",\"output\":\"y\"}\n");
        std::fs::write(&input, bytes).unwrap();

        let args = ValidateArgs { input, tokenizer: None };
        let report = run(&args, None).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.malformed, 1);
    }
}
