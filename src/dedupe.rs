use crate::jsonl::{JsonlReader, JsonlWriter, Line};
use crate::record::{Example, Payload, first_truthy, movie_details, signature};
use crate::{logi, logok};
use anyhow::Result;
use clap::{Args, ValueEnum};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub const UNKNOWN_MOVIE: &str = "UNKNOWN_MOVIE";
pub const UNKNOWN: &str = "UNKNOWN";

const TOP_LEVEL_KEYS: [&str; 5] = ["source_file", "movie_title", "title", "MovieTitle", "movie"];
const PAYLOAD_KEYS: [&str; 5] = ["movie_title", "title", "MovieTitle", "movie", "source_file"];
const DETAIL_KEYS: [&str; 3] = ["title", "movie_title", "name"];
const TOP_COUNTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyStrategy {
    /// Source file, then title fields, then genre/tone groups
    #[default]
    PerMovie,
    /// `movie_details.title | movie | genre`
    Legacy,
}

impl KeyStrategy {
    pub fn default_prefix(self) -> usize {
        match self {
            KeyStrategy::PerMovie => 400,
            KeyStrategy::Legacy => 300,
        }
    }

    pub fn movie_key(self, example: &Example) -> String {
        match self {
            KeyStrategy::PerMovie => per_movie_key(example),
            KeyStrategy::Legacy => example.movie_hint().unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DedupeArgs {
    #[arg(long = "in", default_value = "generation_chunked_with_source.jsonl")]
    pub input: PathBuf,
    #[arg(long, default_value = "generation_cleaned_per_movie.jsonl")]
    pub out: PathBuf,
    /// Maximum examples kept per movie
    #[arg(long, default_value_t = 1000)]
    pub cap: usize,
    #[arg(long, value_enum, default_value_t = KeyStrategy::PerMovie)]
    pub key: KeyStrategy,
    /// Characters of input/output hashed into the signature (400 per-movie, 300 legacy)
    #[arg(long)]
    pub prefix_len: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DedupeReport {
    pub written: usize,
    pub duplicates: usize,
    pub capped: usize,
    pub top_counts: Vec<(String, usize)>,
}

fn per_movie_key(example: &Example) -> String {
    key_candidates(example)
        .map(|k| k.trim().to_string())
        .unwrap_or_else(|| UNKNOWN_MOVIE.to_string())
}

fn key_candidates(example: &Example) -> Option<String> {
    if let Some(key) = first_truthy(&example.extra, &TOP_LEVEL_KEYS) {
        return Some(key);
    }

    let Payload::Object(payload) = example.payload() else {
        return None;
    };
    if let Some(key) = first_truthy(&payload, &PAYLOAD_KEYS) {
        return Some(key);
    }
    let details = movie_details(&payload)?;
    first_truthy(details, &DETAIL_KEYS).or_else(|| genre_group(details))
}

fn genre_group(details: &Map<String, Value>) -> Option<String> {
    let genre = first_truthy(details, &["genre"])?;
    Some(match first_truthy(details, &["tone"]) {
        Some(tone) => format!("__GENRE_{genre}__TONE_{tone}"),
        None => format!("__GENRE_{genre}"),
    })
}

pub struct Deduper {
    strategy: KeyStrategy,
    prefix: usize,
    cap: usize,
    seen: HashSet<String>,
    counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Duplicate,
    Capped,
}

impl Deduper {
    pub fn new(strategy: KeyStrategy, prefix: usize, cap: usize) -> Self {
        Self {
            strategy,
            prefix,
            cap,
            seen: HashSet::new(),
            counts: HashMap::new(),
        }
    }

    pub fn check(&mut self, example: &Example) -> Verdict {
        let sig = signature(&example.input, &example.output, self.prefix);
        if self.seen.contains(&sig) {
            return Verdict::Duplicate;
        }

        let key = self.strategy.movie_key(example);
        let count = self.counts.entry(key).or_default();
        if *count >= self.cap {
            return Verdict::Capped;
        }
        *count += 1;
        self.seen.insert(sig);
        Verdict::Keep
    }

    pub fn top_counts(&self, n: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(k, c)| (k.clone(), *c))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }
}

pub async fn run(args: &DedupeArgs) -> Result<DedupeReport> {
    let prefix = args.prefix_len.unwrap_or_else(|| args.key.default_prefix());
    let mut deduper = Deduper::new(args.key, prefix, args.cap);
    let mut reader = JsonlReader::open(&args.input).await?;
    let mut writer = JsonlWriter::create(&args.out).await?;
    let mut report = DedupeReport::default();

    logi(format!(
        "Deduplicating {} (key {:?}, prefix {}, cap {})",
        args.input.display(),
        args.key,
        prefix,
        args.cap
    ));

    while let Some((_, line)) = reader.next_line::<Example>().await? {
        let Line::Record(example) = line else {
            continue;
        };
        match deduper.check(&example) {
            Verdict::Keep => writer.write(&example).await?,
            Verdict::Duplicate => report.duplicates += 1,
            Verdict::Capped => report.capped += 1,
        }
    }

    report.written = writer.finish().await?;
    report.top_counts = deduper.top_counts(TOP_COUNTS);

    logok(format!("Wrote cleaned file: {}", args.out.display()));
    logi(format!(
        "Per-movie cap: {}. Examples written: {}. Duplicates skipped: {}. Skipped due to cap: {}",
        args.cap, report.written, report.duplicates, report.capped
    ));
    let top: Vec<String> = report
        .top_counts
        .iter()
        .map(|(k, c)| format!("{k}={c}"))
        .collect();
    logi(format!("Top movie counts: {}", top.join(", ")));
    Ok(report)
}
