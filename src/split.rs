use crate::jsonl::{JsonlReader, JsonlWriter, Line};
use crate::record::{Example, first_truthy, movie_details};
use crate::{logi, logok};
use anyhow::{Result, bail};
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub const STOP_MARKER: &str = "\n<|end_of_scene|>";
const TOP_KEYS: usize = 10;

#[derive(Debug, Clone, Args)]
pub struct SplitArgs {
    #[arg(long = "in", default_value = "generation_cleaned_per_movie.jsonl")]
    pub input: PathBuf,
    #[arg(long, default_value = "train.jsonl")]
    pub train: PathBuf,
    #[arg(long, default_value = "val.jsonl")]
    pub val: PathBuf,
    /// Fraction of lines sent to validation
    #[arg(long, default_value_t = 0.05)]
    pub val_pct: f64,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Appended to every output
    #[arg(long, default_value = STOP_MARKER)]
    pub stop: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SplitReport {
    pub total: usize,
    pub missing_meta: usize,
    pub top_keys: Vec<(String, usize)>,
    pub val_size: usize,
    pub train_written: usize,
    pub val_written: usize,
}

pub fn meta_key(example: &Example) -> Option<String> {
    if let Some(source) = first_truthy(&example.extra, &["source_file"]) {
        return Some(source);
    }
    let payload = example.payload();
    let payload = payload.as_object()?;
    first_truthy(payload, &["movie_title"]).or_else(|| first_truthy(movie_details(payload)?, &["title"]))
}

pub fn validation_indices(total: usize, val_pct: f64, seed: u64) -> HashSet<usize> {
    let mut indices: Vec<usize> = (0..total).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let size = ((total as f64 * val_pct).floor() as usize).max(1).min(total);
    indices.into_iter().take(size).collect()
}

/// Right-trims `output` and appends `stop` unless it is already there.
pub fn with_stop_marker(output: &str, stop: &str) -> String {
    let trimmed = output.trim_end();
    let marker = stop.trim_end();
    if !marker.is_empty() && trimmed.ends_with(marker) {
        return trimmed.to_string();
    }
    format!("{trimmed}{stop}")
}

async fn survey(args: &SplitArgs) -> Result<(usize, usize, Vec<(String, usize)>)> {
    let mut reader = JsonlReader::open(&args.input).await?;
    let mut total = 0;
    let mut missing = 0;
    let mut counts: HashMap<String, usize> = HashMap::new();

    while let Some((_, line)) = reader.next_line::<Example>().await? {
        total += 1;
        let Line::Record(example) = line else {
            continue;
        };
        match meta_key(&example) {
            Some(key) => *counts.entry(key).or_default() += 1,
            None => missing += 1,
        }
    }

    let mut top: Vec<(String, usize)> = counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(TOP_KEYS);
    Ok((total, missing, top))
}

pub async fn run(args: &SplitArgs) -> Result<SplitReport> {
    if !(0.0..=1.0).contains(&args.val_pct) {
        bail!("--val-pct must be between 0 and 1, got {}", args.val_pct);
    }

    logi("Counting lines and sampling keys...");
    let (total, missing_meta, top_keys) = survey(args).await?;
    if total == 0 {
        bail!("Input file {} is empty or unreadable.", args.input.display());
    }
    logi(format!("Total lines: {total}"));
    logi(format!("Missing per-example movie metadata: {missing_meta}"));
    let top: Vec<String> = top_keys.iter().map(|(k, c)| format!("{k}={c}")).collect();
    logi(format!("Top movie keys: {}", top.join(", ")));

    let val_idx = validation_indices(total, args.val_pct, args.seed);
    logi(format!(
        "Writing train/val split (val {} lines, seed={})...",
        val_idx.len(),
        args.seed
    ));

    let mut reader = JsonlReader::open(&args.input).await?;
    let mut train = JsonlWriter::create(&args.train).await?;
    let mut val = JsonlWriter::create(&args.val).await?;

    while let Some((idx, line)) = reader.next_line::<Example>().await? {
        let Line::Record(mut example) = line else {
            continue;
        };
        example.output = with_stop_marker(&example.output, &args.stop);
        if val_idx.contains(&idx) {
            val.write(&example).await?;
        } else {
            train.write(&example).await?;
        }
    }

    let report = SplitReport {
        total,
        missing_meta,
        top_keys,
        val_size: val_idx.len(),
        train_written: train.finish().await?,
        val_written: val.finish().await?,
    };
    logok(format!(
        "Wrote train: {}, val: {} (total: {})",
        report.train_written,
        report.val_written,
        report.train_written + report.val_written
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_marker_is_appended_once() {
        assert_eq!(with_stop_marker("Scene.  \n", STOP_MARKER), "Scene.\n<|end_of_scene|>");
        assert_eq!(
            with_stop_marker("Scene.\n<|end_of_scene|>\n", STOP_MARKER),
            "Scene.\n<|end_of_scene|>"
        );
        assert_eq!(with_stop_marker("", STOP_MARKER), STOP_MARKER);
    }

    #[test]
    fn validation_set_is_seeded_and_nonempty() {
        let a = validation_indices(100, 0.05, 42);
        assert_eq!(a.len(), 5);
        assert_eq!(a, validation_indices(100, 0.05, 42));
        assert!(a.iter().all(|i| *i < 100));

        assert_eq!(validation_indices(3, 0.05, 7).len(), 1);
        assert_eq!(validation_indices(1, 0.0, 7).len(), 1);
    }

    #[test]
    fn meta_key_prefers_source_file() {
        let mut ex = Example::new("i", r#"{"movie_details":{"title":"Heat"}}"#, "o");
        assert_eq!(meta_key(&ex).as_deref(), Some("Heat"));
        ex.input = r#"{"movie_title":"Alien","movie_details":{"title":"Heat"}}"#.into();
        assert_eq!(meta_key(&ex).as_deref(), Some("Alien"));
        ex.extra.insert("source_file".into(), json!("Up.txt"));
        assert_eq!(meta_key(&ex).as_deref(), Some("Up.txt"));
        assert_eq!(meta_key(&Example::new("i", "plain", "o")), None);
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.jsonl");
        std::fs::write(&input, "").unwrap();
        let args = SplitArgs {
            input,
            train: dir.path().join("train.jsonl"),
            val: dir.path().join("val.jsonl"),
            val_pct: 0.05,
            seed: 42,
            stop: STOP_MARKER.into(),
        };
        assert!(run(&args).await.is_err());
    }

    #[tokio::test]
    async fn every_good_line_lands_in_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let mut lines: Vec<String> = (0..40)
            .map(|i| Example::new("i", "{}", format!("scene {i}  ")).to_line().unwrap())
            .collect();
        lines.push("garbage".into());
        std::fs::write(&input, lines.join("\n")).unwrap();

        let args = SplitArgs {
            input,
            train: dir.path().join("train.jsonl"),
            val: dir.path().join("val.jsonl"),
            val_pct: 0.1,
            seed: 42,
            stop: STOP_MARKER.into(),
        };
        let report = run(&args).await.unwrap();
        assert_eq!(report.total, 41);
        assert_eq!(report.missing_meta, 40);
        assert_eq!(report.val_size, 4);
        assert_eq!(report.train_written + report.val_written, 40);
        assert!(report.val_written >= 3);

        let train: Vec<Example> = crate::jsonl::read_all(&args.train).await.unwrap();
        assert!(train.iter().all(|e| e.output.ends_with("<|end_of_scene|>")));
        assert!(train.iter().all(|e| !e.output.contains("  \n")));
    }
}
