use crate::init::{file_name_string, list_text_files, read_text_lossy};
use crate::jsonl::JsonlWriter;
use crate::metadata::{MatchKind, MetadataTable, MovieDetails, title_from_filename};
use crate::record::{Example, SCREENWRITER_INSTRUCTION};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;

const STRICT_HEADING: &str = r"(?m)^(?:INT\.|EXT\.)";
const LENIENT_HEADING: &str = r"(?m)^[ \t]*(?:INT\./EXT\.|EXT\./INT\.|INT/EXT\.|I/E\.|INT\.|EXT\.)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum HeadingMode {
    /// Lines starting with `INT.` or `EXT.`
    #[default]
    Strict,
    /// Also indented headings and `INT./EXT.`, `I/E.` forms
    Lenient,
}

impl HeadingMode {
    fn regex(self) -> Result<&'static Regex> {
        static STRICT: OnceCell<Regex> = OnceCell::new();
        static LENIENT: OnceCell<Regex> = OnceCell::new();
        let (cell, pattern) = match self {
            HeadingMode::Strict => (&STRICT, STRICT_HEADING),
            HeadingMode::Lenient => (&LENIENT, LENIENT_HEADING),
        };
        cell.get_or_try_init(|| Regex::new(pattern).context("failed to compile scene heading regex"))
    }
}

#[derive(Debug, Clone, Args)]
pub struct SceneArgs {
    /// Directory of raw script `.txt` files
    #[arg(long, default_value = "raw_texts")]
    pub raw_dir: PathBuf,
    /// Metadata CSV produced by collect-metadata
    #[arg(long, default_value = "dataset.csv")]
    pub csv: PathBuf,
    #[arg(long, default_value = "finetuning_generation_dataset.jsonl")]
    pub out: PathBuf,
    #[arg(long, value_enum, default_value_t = HeadingMode::Strict)]
    pub heading_mode: HeadingMode,
    /// Minimum similarity for a fuzzy title match
    #[arg(long, default_value_t = 0.85)]
    pub fuzzy_cutoff: f64,
    /// Leave `movie_title` out of each example's input
    #[arg(long)]
    pub no_embed_title: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SceneReport {
    pub scripts: usize,
    pub exact: usize,
    pub normalized: usize,
    pub fuzzy: usize,
    pub unmatched: usize,
    pub too_few_scenes: usize,
    pub examples: usize,
}

#[derive(Serialize)]
struct ScenePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    movie_title: Option<&'a str>,
    movie_details: &'a MovieDetails,
    previous_scene: &'a str,
}

pub fn split_script_into_scenes(script: &str, mode: HeadingMode) -> Result<Vec<String>> {
    let mut bounds: Vec<usize> = mode.regex()?.find_iter(script).map(|m| m.start()).collect();
    if bounds.first() != Some(&0) {
        bounds.insert(0, 0);
    }
    bounds.push(script.len());

    Ok(bounds
        .windows(2)
        .map(|w| script[w[0]..w[1]].trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn scene_pairs(scenes: &[String], details: &MovieDetails, movie_title: Option<&str>) -> Result<Vec<Example>> {
    scenes
        .windows(2)
        .map(|pair| {
            let payload = ScenePayload {
                movie_title,
                movie_details: details,
                previous_scene: &pair[0],
            };
            let input = serde_json::to_string(&payload).context("Failed to encode scene input")?;
            Ok(Example::new(SCREENWRITER_INSTRUCTION, input, pair[1].clone()))
        })
        .collect()
}

pub async fn run(args: &SceneArgs) -> Result<SceneReport> {
    let table = MetadataTable::load(&args.csv).await?;
    let files = list_text_files(&args.raw_dir)?;
    let mut report = SceneReport {
        scripts: files.len(),
        ..SceneReport::default()
    };

    logi(format!(
        "Processing {} scripts ({} movies in metadata) to create {}...",
        files.len(),
        table.len(),
        args.out.display()
    ));
    let mut writer = JsonlWriter::create(&args.out).await?;

    for path in &files {
        let movie_title = title_from_filename(&file_name_string(path));
        let Some((kind, row)) = table.match_title(&movie_title, args.fuzzy_cutoff) else {
            logw(format!("No details found for '{}' in the CSV. Skipping.", movie_title));
            report.unmatched += 1;
            continue;
        };
        match kind {
            MatchKind::Exact => report.exact += 1,
            MatchKind::Normalized => report.normalized += 1,
            MatchKind::Fuzzy => {
                logi(format!("Fuzzy-matched '{}' to '{}'", movie_title, row.title));
                report.fuzzy += 1;
            }
        }

        let script = read_text_lossy(path).await?;
        let scenes = split_script_into_scenes(&script, args.heading_mode)?;
        if scenes.len() < 2 {
            logw(format!("Could not split '{}' into enough scenes. Skipping.", movie_title));
            report.too_few_scenes += 1;
            continue;
        }

        let title = (!args.no_embed_title).then_some(row.title.as_str());
        for example in scene_pairs(&scenes, &row.details(), title)? {
            writer.write(&example).await?;
        }
    }

    report.examples = writer.finish().await?;
    logok(format!(
        "Generation dataset creation complete! {} examples saved to {}",
        report.examples,
        args.out.display()
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;

    const SCRIPT: &str = "FADE IN:\n\nINT. KITCHEN - NIGHT\nAnna pours tea.\n\nEXT. GARDEN - DAY\nRain.\n  INT. INDENTED HALL\nEcho.\nINT./EXT. CAR - MOVING\nEngine.\n";

    #[test]
    fn strict_split_keeps_heading_and_preamble() {
        let scenes = split_script_into_scenes(SCRIPT, HeadingMode::Strict).unwrap();
        assert_eq!(scenes.len(), 4);
        assert_eq!(scenes[0], "FADE IN:");
        assert!(scenes[1].starts_with("INT. KITCHEN - NIGHT"));
        assert!(scenes[2].contains("INT. INDENTED HALL"));
        assert!(scenes[3].starts_with("INT./EXT. CAR"));
    }

    #[test]
    fn lenient_split_accepts_indented_headings() {
        let scenes = split_script_into_scenes(SCRIPT, HeadingMode::Lenient).unwrap();
        assert_eq!(scenes.len(), 5);
        assert_eq!(scenes[3], "INT. INDENTED HALL\nEcho.");
    }

    #[test]
    fn lenient_split_accepts_slash_forms() {
        let script = "A\nINT/EXT. CAR\nx\nI/E. VAN\ny\nEXT./INT. BUS\nz";
        assert_eq!(
            split_script_into_scenes(script, HeadingMode::Lenient).unwrap(),
            vec!["A", "INT/EXT. CAR\nx", "I/E. VAN\ny", "EXT./INT. BUS\nz"]
        );
        assert_eq!(split_script_into_scenes(script, HeadingMode::Strict).unwrap().len(), 2);
    }

    #[test]
    fn script_without_headings_is_one_scene() {
        assert_eq!(
            split_script_into_scenes("just prose", HeadingMode::Strict).unwrap(),
            vec!["just prose"]
        );
        assert!(split_script_into_scenes("   \n", HeadingMode::Strict).unwrap().is_empty());
    }

    #[test]
    fn pairs_embed_previous_scene_and_details() {
        let scenes = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let details = MovieDetails {
            genre: "Drama".into(),
            theme: "Loss".into(),
            tone: "Quiet".into(),
        };
        let examples = scene_pairs(&scenes, &details, Some("Up")).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].output, "C");
        assert_eq!(
            examples[1].input,
            r#"{"movie_title":"Up","movie_details":{"genre":"Drama","theme":"Loss","tone":"Quiet"},"previous_scene":"B"}"#
        );

        let bare = scene_pairs(&scenes, &details, None).unwrap();
        let Payload::Object(map) = bare[0].payload() else { panic!("object payload") };
        assert!(!map.contains_key("movie_title"));
    }

    #[tokio::test]
    async fn run_matches_titles_and_skips_short_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir(&raw).unwrap();
        std::fs::write(raw.join("Alien_1979.txt"), "INT. SHIP\nHum.\nEXT. PLANET\nWind.\nINT. SHIP\nAlarm.").unwrap();
        std::fs::write(raw.join("the matrix.txt"), "INT. ROOM\nPills.\nEXT. ROOF\nJump.").unwrap();
        std::fs::write(raw.join("Heat.txt"), "INT. BANK\nOnly one scene.").unwrap();
        std::fs::write(raw.join("Unknown.txt"), "INT. A\nx\nINT. B\ny").unwrap();
        let csv = dir.path().join("dataset.csv");
        std::fs::write(
            &csv,
            "MovieTitle,Genre,Theme,Tone,Length (min)\nAlien,Horror,Survival,Tense,117\nThe Matrix,Sci-Fi,Control,Dark,136\nHeat,Crime,Duty,Cool,170\n",
        )
        .unwrap();

        let args = SceneArgs {
            raw_dir: raw,
            csv,
            out: dir.path().join("out.jsonl"),
            heading_mode: HeadingMode::Strict,
            fuzzy_cutoff: 0.85,
            no_embed_title: false,
        };
        let report = run(&args).await.unwrap();
        assert_eq!(report.scripts, 4);
        assert_eq!(report.exact, 2);
        assert_eq!(report.normalized, 1);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.too_few_scenes, 1);
        assert_eq!(report.examples, 3);

        let written: Vec<Example> = crate::jsonl::read_all(&args.out).await.unwrap();
        assert_eq!(written[0].output, "EXT. PLANET\nWind.");
        assert!(written[0].input.contains(r#""movie_title":"Alien""#));
    }
}
