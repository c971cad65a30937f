use crate::init::{ensure_parent_dir, strip_ext};
use crate::logw;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRow {
    #[serde(rename = "MovieTitle")]
    pub title: String,
    #[serde(rename = "Genre", default)]
    pub genre: String,
    #[serde(rename = "Theme", default)]
    pub theme: String,
    #[serde(rename = "Tone", default)]
    pub tone: String,
    #[serde(rename = "Length (min)", default, deserialize_with = "csv::invalid_option")]
    pub length_min: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub genre: String,
    pub theme: String,
    pub tone: String,
}

fn or_na(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

impl MovieRow {
    pub fn details(&self) -> MovieDetails {
        MovieDetails {
            genre: or_na(&self.genre),
            theme: or_na(&self.theme),
            tone: or_na(&self.tone),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    Normalized,
    Fuzzy,
}

#[derive(Debug, Default)]
pub struct MetadataTable {
    rows: HashMap<String, MovieRow>,
    normalized: HashMap<String, String>,
    order: Vec<String>,
}

impl MetadataTable {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("'{}' not found or unreadable; run collect-metadata first", path.display()))?;
        Self::from_csv(&text)
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut table = Self::default();
        for (idx, row) in reader.deserialize::<MovieRow>().enumerate() {
            match row {
                Ok(row) => table.insert(row),
                Err(err) => logw(format!("Skipping metadata row {}: {}", idx + 1, err)),
            }
        }
        Ok(table)
    }

    /// Later rows replace earlier rows with the same title.
    pub fn insert(&mut self, row: MovieRow) {
        let title = row.title.trim().to_string();
        if !self.rows.contains_key(&title) {
            self.order.push(title.clone());
        }
        self.normalized.insert(normalize_title(&title), title.clone());
        self.rows.insert(title, row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, title: &str) -> Option<&MovieRow> {
        self.rows.get(title)
    }

    pub fn match_title(&self, title: &str, cutoff: f64) -> Option<(MatchKind, &MovieRow)> {
        if let Some(row) = self.rows.get(title) {
            return Some((MatchKind::Exact, row));
        }

        let wanted = normalize_title(title);
        if let Some(row) = self.normalized.get(&wanted).and_then(|t| self.rows.get(t)) {
            return Some((MatchKind::Normalized, row));
        }

        let mut best: Option<(f64, &str)> = None;
        for candidate in &self.order {
            let score = similarity(&wanted, &normalize_title(candidate));
            if score >= cutoff && best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, candidate.as_str()));
            }
        }
        best.and_then(|(_, t)| self.rows.get(t))
            .map(|row| (MatchKind::Fuzzy, row))
    }
}

pub fn title_from_filename(file_name: &str) -> String {
    let stem = strip_ext(file_name);
    stem.split('_').next().unwrap_or_default().to_string()
}

pub fn normalize_title(title: &str) -> String {
    let mapped: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

pub async fn read_processed_titles(path: &Path) -> Result<Option<HashSet<String>>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("Failed to read {}", path.display())),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut titles = HashSet::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed CSV in {}", path.display()))?;
        if let Some(title) = record.get(0) {
            if !title.is_empty() {
                titles.insert(title.to_string());
            }
        }
    }
    Ok(Some(titles))
}

/// Appends rows one at a time, flushing each so an interrupted run keeps its progress.
pub struct MetadataAppender {
    file: fs::File,
}

impl MetadataAppender {
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path).await?;
        let is_new = fs::metadata(path).await.map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {} for append", path.display()))?;

        if is_new {
            let header = encode_csv_record(&["MovieTitle", "Genre", "Theme", "Tone", "Length (min)"])?;
            file.write_all(&header).await?;
            file.flush().await?;
        }
        Ok(Self { file })
    }

    pub async fn append(&mut self, row: &MovieRow) -> Result<()> {
        let length = row.length_min.unwrap_or(0).to_string();
        let bytes = encode_csv_record(&[
            row.title.as_str(),
            row.genre.as_str(),
            row.theme.as_str(),
            row.tone.as_str(),
            length.as_str(),
        ])?;
        self.file.write_all(&bytes).await?;
        self.file.flush().await?;
        Ok(())
    }
}

fn encode_csv_record(fields: &[&str]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to encode CSV row: {}", e.error()))
}
