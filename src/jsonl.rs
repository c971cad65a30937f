use crate::init::ensure_parent_dir;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

pub struct JsonlReader {
    path: PathBuf,
    reader: BufReader<File>,
    index: usize,
}

#[derive(Debug)]
pub enum Line<T> {
    Record(T),
    Blank,
    Malformed(serde_json::Error),
}

impl JsonlReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            index: 0,
        })
    }

    pub async fn next_raw(&mut self) -> Result<Option<(usize, Vec<u8>)>> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("Failed to read line {} of {}", self.index + 1, self.path.display()))?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let idx = self.index;
        self.index += 1;
        Ok(Some((idx, buf)))
    }

    /// Next line decoded as `T`; invalid UTF-8 decodes as `Line::Malformed`.
    pub async fn next_line<T: DeserializeOwned>(&mut self) -> Result<Option<(usize, Line<T>)>> {
        Ok(self.next_raw().await?.map(|(idx, raw)| (idx, parse_line(&raw))))
    }
}

pub fn parse_line<T: DeserializeOwned>(raw: &[u8]) -> Line<T> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Line::Blank;
    }
    match serde_json::from_slice(raw) {
        Ok(record) => Line::Record(record),
        Err(err) => Line::Malformed(err),
    }
}

pub struct JsonlWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    pub async fn create(path: &Path) -> Result<Self> {
        ensure_parent_dir(path).await?;
        let file = File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            written: 0,
        })
    }

    pub async fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to encode record")?;
        line.push('\n');
        self.out
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub async fn finish(mut self) -> Result<usize> {
        self.out
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        Ok(self.written)
    }
}

pub async fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = JsonlReader::open(path).await?;
    let mut out = Vec::new();
    while let Some((_, line)) = reader.next_line::<T>().await? {
        if let Line::Record(record) = line {
            out.push(record);
        }
    }
    Ok(out)
}
