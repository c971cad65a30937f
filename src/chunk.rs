use crate::jsonl::{JsonlReader, JsonlWriter, Line, parse_line};
use crate::record::{Example, Payload, char_len, prefix_chars, preview};
use crate::tokens::{DEFAULT_TOKENIZER, TokenCounter};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;

/// Smallest useful output budget before falling back to a character prefix.
const MIN_OUTPUT_TOKENS: usize = 20;
const FALLBACK_CHARS: usize = 1000;

#[derive(Debug, Clone, Args)]
pub struct ChunkArgs {
    /// Input JSONL path
    #[arg(long = "in")]
    pub input: PathBuf,
    /// Output JSONL path (chunked/truncated)
    #[arg(long)]
    pub out: PathBuf,
    /// Hub model id, local tokenizer.json, or `estimate`
    #[arg(long, default_value = DEFAULT_TOKENIZER)]
    pub tokenizer: String,
    /// Max tokens allowed for input+output before chunking/truncation
    #[arg(long, default_value_t = 3500)]
    pub max_tokens: usize,
    /// Show the top-K longest entries before processing
    #[arg(long, default_value_t = 20)]
    pub topk: usize,
    /// Minimum paragraph length to keep when chunking
    #[arg(long, default_value_t = 80)]
    pub min_para_chars: usize,
    /// When chunking, set previous_scene to the prior paragraph
    #[arg(long)]
    pub make_prev_para: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LongEntry {
    pub tokens: usize,
    /// 1-based line number.
    pub line_no: usize,
    pub line: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChunkReport {
    pub processed: usize,
    pub written: usize,
    pub chunked: usize,
    pub truncated: usize,
    pub malformed: usize,
    pub longest: Vec<LongEntry>,
}

fn paragraph_regex() -> Result<&'static Regex> {
    static PARA_RE: OnceCell<Regex> = OnceCell::new();
    PARA_RE.get_or_try_init(|| Regex::new(r"\n\s*\n+").context("failed to compile paragraph regex"))
}

pub fn paragraphs(text: &str, min_chars: usize) -> Result<Vec<String>> {
    Ok(paragraph_regex()?
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty() && char_len(p) >= min_chars)
        .map(str::to_string)
        .collect())
}

/// Truncates `output` so that `input + output` stays within `max_tokens`.
pub fn truncate_output(counter: &dyn TokenCounter, input: &str, output: &str, max_tokens: usize) -> String {
    let input_tokens = counter.count(input);
    let allowed = max_tokens.saturating_sub(input_tokens + 1);
    if allowed <= MIN_OUTPUT_TOKENS {
        return prefix_chars(output, FALLBACK_CHARS).to_string();
    }
    if counter.count(output) <= allowed {
        return output.to_string();
    }
    match counter.truncate(output, allowed) {
        Ok(text) => text,
        Err(err) => {
            logw(format!("Token truncation failed ({err:#}); using a character prefix"));
            prefix_chars(output, FALLBACK_CHARS.max(allowed * 2)).to_string()
        }
    }
}

pub fn chunk_example(example: &Example, paras: &[String], make_prev_para: bool) -> Result<Vec<Example>> {
    let payload = example.payload();
    let mut out = Vec::with_capacity(paras.len());

    for (i, para) in paras.iter().enumerate() {
        let previous = if i == 0 { "" } else { paras[i - 1].as_str() };
        let mut child = Example {
            output: para.clone(),
            ..example.clone()
        };

        if make_prev_para {
            child.input = match &payload {
                Payload::Object(map) => {
                    let mut map = map.clone();
                    map.insert("previous_scene".into(), Value::String(previous.to_string()));
                    serde_json::to_string(&map).context("Failed to encode chunk input")?
                }
                _ => format!("Previous paragraph:\n{previous}\n\n{}", example.input),
            };
        }
        out.push(child);
    }
    Ok(out)
}

fn progress(label: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg} {pos} lines") {
        bar.set_style(style);
    }
    bar.set_message(label.to_string());
    bar
}

pub async fn scan_longest(args: &ChunkArgs, counter: &dyn TokenCounter) -> Result<Vec<LongEntry>> {
    let mut heap: BinaryHeap<Reverse<LongEntry>> = BinaryHeap::new();
    let mut reader = JsonlReader::open(&args.input).await?;
    let bar = progress("Scanning token lengths");

    while let Some((idx, raw)) = reader.next_raw().await? {
        bar.inc(1);
        let Line::Record(example) = parse_line::<Example>(&raw) else {
            continue;
        };
        if args.topk == 0 {
            continue;
        }

        let entry = LongEntry {
            tokens: counter.count(&example.combined_text()),
            line_no: idx + 1,
            line: String::from_utf8_lossy(&raw).into_owned(),
        };
        if heap.len() < args.topk {
            heap.push(Reverse(entry));
        } else if heap.peek().map(|Reverse(min)| entry.tokens > min.tokens).unwrap_or(false) {
            heap.pop();
            heap.push(Reverse(entry));
        }
    }
    bar.finish_and_clear();

    let mut longest: Vec<LongEntry> = heap.into_iter().map(|Reverse(e)| e).collect();
    longest.sort_by(|a, b| b.cmp(a));
    Ok(longest)
}

fn log_longest(longest: &[LongEntry]) {
    logi(format!("Top {} longest entries (token counts):", longest.len()));
    for entry in longest {
        let Line::Record(example) = parse_line::<Example>(entry.line.as_bytes()) else {
            continue;
        };
        let hint = example.movie_hint().unwrap_or_else(|| "UNKNOWN".to_string());
        logi(format!(
            "Line {}: tokens={}  movie_hint={}\n  input_preview: {}...\n  output_preview: {}...",
            entry.line_no,
            entry.tokens,
            hint,
            preview(&example.input, 200),
            preview(&example.output, 400)
        ));
    }
}

pub async fn run(args: &ChunkArgs, counter: &dyn TokenCounter) -> Result<ChunkReport> {
    let mut report = ChunkReport {
        longest: scan_longest(args, counter).await?,
        ..ChunkReport::default()
    };
    log_longest(&report.longest);

    logi(format!(
        "Processing and writing to {} (entries with tokens > {} will be chunked/truncated)",
        args.out.display(),
        args.max_tokens
    ));
    let mut reader = JsonlReader::open(&args.input).await?;
    let mut writer = JsonlWriter::create(&args.out).await?;
    let bar = progress("Chunking");

    while let Some((_, line)) = reader.next_line::<Example>().await? {
        bar.inc(1);
        report.processed += 1;
        let example = match line {
            Line::Record(example) => example,
            Line::Blank => continue,
            Line::Malformed(_) => {
                report.malformed += 1;
                continue;
            }
        };

        if counter.count(&example.combined_text()) <= args.max_tokens {
            writer.write(&example).await?;
            continue;
        }

        let paras = paragraphs(&example.output, args.min_para_chars)?;
        if paras.len() >= 2 {
            for child in chunk_example(&example, &paras, args.make_prev_para)? {
                writer.write(&child).await?;
            }
            report.chunked += 1;
            continue;
        }

        let output = truncate_output(counter, &example.input, &example.output, args.max_tokens);
        writer.write(&Example { output, ..example }).await?;
        report.truncated += 1;
    }
    bar.finish_and_clear();

    report.written = writer.finish().await?;
    logok(format!(
        "Processed {} lines, wrote {}, chunked {}, truncated {}, malformed {}. Output saved to {}",
        report.processed,
        report.written,
        report.chunked,
        report.truncated,
        report.malformed,
        args.out.display()
    ));
    Ok(report)
}
