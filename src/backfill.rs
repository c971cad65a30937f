use crate::init::{file_name_string, list_text_files, read_text_lossy, strip_ext};
use crate::jsonl::{JsonlReader, JsonlWriter, Line};
use crate::metadata::similarity;
use crate::record::{Example, Payload, prefix_chars, truthy};
use crate::{logi, logok};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Value, json};
use std::path::PathBuf;

const FUZZY_PREFIX_CHARS: usize = 50;
const PROGRESS_EVERY: usize = 5000;

#[derive(Debug, Clone, Args)]
pub struct BackfillArgs {
    /// Input JSONL
    #[arg(long, default_value = "generation_chunked.jsonl")]
    pub jsonl: PathBuf,
    /// Directory of raw script `.txt` files
    #[arg(long, default_value = "raw_texts")]
    pub raw_dir: PathBuf,
    #[arg(long, default_value = "generation_chunked_with_source.jsonl")]
    pub out: PathBuf,
    /// Length of the output prefix searched for in the raw texts
    #[arg(long, default_value_t = 120)]
    pub substr_len: usize,
    /// Minimum file-name similarity for the fuzzy fallback
    #[arg(long, default_value_t = 0.75)]
    pub fuzzy_cutoff: f64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BackfillReport {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub malformed: usize,
}

pub struct SourceIndex {
    texts: Vec<(String, String)>,
    cutoff: f64,
}

impl SourceIndex {
    pub async fn load(dir: &std::path::Path, cutoff: f64) -> Result<Self> {
        logi("Loading raw texts into memory for substring search...");
        let mut texts = Vec::new();
        for path in list_text_files(dir)? {
            let text = read_text_lossy(&path).await?;
            texts.push((file_name_string(&path), text.to_lowercase()));
        }
        logi(format!("Loaded {} raw files.", texts.len()));
        Ok(Self { texts, cutoff })
    }

    pub fn from_texts(texts: Vec<(String, String)>, cutoff: f64) -> Self {
        let texts = texts.into_iter().map(|(name, text)| (name, text.to_lowercase())).collect();
        Self { texts, cutoff }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn find(&self, candidate: &str) -> Option<&str> {
        let needle = candidate.to_lowercase();
        if let Some((name, _)) = self.texts.iter().find(|(_, text)| text.contains(&needle)) {
            return Some(name);
        }

        let short = prefix_chars(candidate, FUZZY_PREFIX_CHARS);
        let mut best: Option<(f64, &str)> = None;
        for (name, _) in &self.texts {
            let score = similarity(short, name);
            if score >= self.cutoff && best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, name.as_str()));
            }
        }
        best.map(|(_, name)| name)
    }
}

pub fn inject_source(example: &mut Example, file_name: &str) -> Result<()> {
    let stem = strip_ext(file_name);
    example
        .extra
        .insert("source_file".into(), Value::String(file_name.to_string()));

    match example.payload() {
        Payload::Object(mut map) => {
            if !map.get("movie_title").map(truthy).unwrap_or(false) {
                map.insert("movie_title".into(), Value::String(stem));
                example.input = serde_json::to_string(&map).context("Failed to encode input payload")?;
            }
        }
        Payload::NotObject => {}
        Payload::Invalid => {
            let header = json!({ "movie_title": stem, "previous_scene": "" });
            example.input = format!("{header}{}", example.input);
        }
    }
    Ok(())
}

pub async fn run(args: &BackfillArgs) -> Result<BackfillReport> {
    let index = SourceIndex::load(&args.raw_dir, args.fuzzy_cutoff).await?;
    let mut reader = JsonlReader::open(&args.jsonl).await?;
    let mut writer = JsonlWriter::create(&args.out).await?;
    let mut report = BackfillReport::default();

    while let Some((idx, line)) = reader.next_line::<Example>().await? {
        report.total = idx + 1;
        let mut example = match line {
            Line::Record(example) => example,
            Line::Blank => continue,
            Line::Malformed(_) => {
                report.malformed += 1;
                continue;
            }
        };

        let output = example.output.trim();
        if output.is_empty() {
            report.not_found += 1;
        } else {
            let candidate = prefix_chars(output, args.substr_len).to_string();
            match index.find(&candidate).map(str::to_string) {
                Some(name) => {
                    inject_source(&mut example, &name)?;
                    report.found += 1;
                }
                None => report.not_found += 1,
            }
        }
        writer.write(&example).await?;

        if report.total % PROGRESS_EVERY == 0 {
            logi(format!(
                "Processed {} lines. Found: {}, Not found: {}",
                report.total, report.found, report.not_found
            ));
        }
    }

    writer.finish().await?;
    logok(format!(
        "Done. Total: {} Found: {} Not found: {} Malformed: {}. Output written to {}",
        report.total,
        report.found,
        report.not_found,
        report.malformed,
        args.out.display()
    ));
    Ok(report)
}
