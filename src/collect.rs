use crate::api::TextGenerator;
use crate::init::{file_name_string, list_text_files};
use crate::metadata::{MetadataAppender, MovieRow, NOT_AVAILABLE, read_processed_titles, title_from_filename};
use crate::record::value_text;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const RUNTIME_KEYS: [&str; 3] = ["runtime_minutes", "length_minutes", "runtime"];

#[derive(Debug, Clone, Args)]
pub struct CollectArgs {
    /// Directory of raw script `.txt` files
    #[arg(long, default_value = "raw_texts")]
    pub raw_dir: PathBuf,
    /// Metadata CSV to create or extend
    #[arg(long, default_value = "dataset.csv")]
    pub csv: PathBuf,
    /// Model name (defaults to the configured Gemini model)
    #[arg(long)]
    pub model: Option<String>,
    /// Pause after each request, for API rate limits
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CollectReport {
    pub files: usize,
    pub already_present: usize,
    pub added: usize,
    pub failed: usize,
}

pub fn build_prompt(movie_title: &str) -> String {
    format!(
        "Act as a movie database. For the movie titled \"{movie_title}\", provide the following information in a single, clean JSON object with these exact keys: \"genre\", \"theme\", \"tone\", and \"runtime_minutes\".\n\
         - genre: The primary genre.\n\
         - theme: A brief description of the central theme.\n\
         - tone: The overall mood or feeling.\n\
         - runtime_minutes: The official runtime in minutes as an integer.\n\
         Do not include any text, notes, or markdown formatting before or after the JSON object."
    )
}

pub fn parse_movie_info(movie_title: &str, reply: &str) -> Result<MovieRow> {
    let cleaned = reply.trim().replace("```json", "").replace("```", "");
    let info: Map<String, Value> =
        serde_json::from_str(cleaned.trim()).context("model reply is not a JSON object")?;

    let mut length = 0;
    if let Some(value) = RUNTIME_KEYS.iter().find_map(|k| info.get(*k)) {
        length = runtime_minutes(value)?;
    }

    let field = |key: &str| {
        info.get(key)
            .filter(|v| !v.is_null())
            .map(value_text)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };

    Ok(MovieRow {
        title: movie_title.to_string(),
        genre: field("genre"),
        theme: field("theme"),
        tone: field("tone"),
        length_min: Some(length),
    })
}

fn runtime_minutes(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .context("runtime out of range"),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("runtime is not an integer: {s:?}")),
        Value::Null => Ok(0),
        other => anyhow::bail!("runtime has unexpected type: {other}"),
    }
}

pub async fn run(args: &CollectArgs, model: &dyn TextGenerator) -> Result<CollectReport> {
    let files = list_text_files(&args.raw_dir)?;
    let mut report = CollectReport {
        files: files.len(),
        ..CollectReport::default()
    };

    let mut processed: HashSet<String> = match read_processed_titles(&args.csv).await? {
        Some(titles) => {
            logok(format!(
                "Found {} movies already in '{}'. Will skip them.",
                titles.len(),
                args.csv.display()
            ));
            titles
        }
        None => {
            logi(format!("'{}' not found. A new file will be created.", args.csv.display()));
            HashSet::new()
        }
    };

    let mut appender = MetadataAppender::open(&args.csv).await?;
    logi(format!("Found {} total scripts. Starting analysis...", files.len()));

    for (index, path) in files.iter().enumerate() {
        let movie_title = title_from_filename(&file_name_string(path));
        if processed.contains(&movie_title) {
            report.already_present += 1;
            continue;
        }

        logi(format!("({}/{}) Querying for: {}", index + 1, files.len(), movie_title));
        let outcome = match model.generate(&build_prompt(&movie_title)).await {
            Ok(reply) => parse_movie_info(&movie_title, &reply),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(row) => {
                appender.append(&row).await?;
                report.added += 1;
            }
            Err(err) => {
                logw(format!("Could not process {}. Error: {:#}. Skipping.", movie_title, err));
                report.failed += 1;
            }
        }
        processed.insert(movie_title);

        if args.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }

    logok(format!(
        "Analysis complete! Added {}, skipped {}, failed {}",
        report.added, report.already_present, report.failed
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataTable;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for FakeModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("\"Broken\"") {
                return Ok("I am not sure.".to_string());
            }
            Ok("```json\n{\"genre\": \"Drama\", \"theme\": \"Loss\", \"tone\": \"Somber\", \"runtime_minutes\": \"104\"}\n```".to_string())
        }
    }

    #[test]
    fn parses_fenced_reply_and_runtime_variants() {
        let row = parse_movie_info("Heat", "```json\n{\"genre\":\"Crime\",\"runtime\":170.6}\n```").unwrap();
        assert_eq!(row.genre, "Crime");
        assert_eq!(row.theme, NOT_AVAILABLE);
        assert_eq!(row.length_min, Some(170));

        let row = parse_movie_info("Heat", r#"{"genre":"Crime","length_minutes":"95","runtime_minutes":120}"#).unwrap();
        assert_eq!(row.length_min, Some(120));

        let row = parse_movie_info("Heat", r#"{"genre":null,"theme":"  ","tone":"Cool"}"#).unwrap();
        assert_eq!(row.genre, NOT_AVAILABLE);
        assert_eq!(row.theme, NOT_AVAILABLE);
        assert_eq!(row.tone, "Cool");
        assert_eq!(row.length_min, Some(0));

        assert!(parse_movie_info("Heat", r#"{"runtime_minutes":"two hours"}"#).is_err());
        assert!(parse_movie_info("Heat", "no json here").is_err());
    }

    #[test]
    fn prompt_names_the_movie() {
        let prompt = build_prompt("Alien");
        assert!(prompt.contains("movie titled \"Alien\""));
        assert!(prompt.contains("runtime_minutes"));
    }

    #[tokio::test]
    async fn skips_known_titles_and_continues_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw_texts");
        std::fs::create_dir(&raw).unwrap();
        for name in ["Alien_1979.txt", "Alien_draft.txt", "Broken.txt", "Heat.txt", "Up.txt"] {
            std::fs::write(raw.join(name), "INT. ROOM").unwrap();
        }
        let csv = dir.path().join("dataset.csv");
        std::fs::write(&csv, "MovieTitle,Genre,Theme,Tone,Length (min)\nUp,Animation,Age,Warm,96\n").unwrap();

        let model = FakeModel { prompts: Mutex::new(Vec::new()) };
        let args = CollectArgs {
            raw_dir: raw,
            csv: csv.clone(),
            model: None,
            delay_ms: 0,
        };
        let report = run(&args, &model).await.unwrap();

        assert_eq!(
            report,
            CollectReport { files: 5, already_present: 2, added: 2, failed: 1 }
        );
        assert_eq!(model.prompts.lock().unwrap().len(), 3);

        let text = std::fs::read_to_string(&csv).unwrap();
        let table = MetadataTable::from_csv(&text).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("Alien").unwrap().length_min, Some(104));
        assert_eq!(text.matches("MovieTitle").count(), 1);
    }
}
