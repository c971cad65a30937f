use crate::logi;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
            logi(format!("Created directory: {}", parent.display()));
        }
    }
    Ok(())
}

pub async fn require_file(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => anyhow::bail!("Input file not found: {}", path.display()),
    }
}

pub fn list_text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Script directory not found: {}", dir.display());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(OsStr::to_str) == Some("txt") {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

pub async fn read_text_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn strip_ext(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or(filename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_top_level_txt_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("notes.md"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.txt"), "c").unwrap();

        let files = list_text_files(dir.path()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name_string(p)).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn strip_ext_keeps_inner_dots() {
        assert_eq!(strip_ext("Alien_1979.txt"), "Alien_1979");
        assert_eq!(strip_ext("Mr. Smith.txt"), "Mr. Smith");
    }

    #[tokio::test]
    async fn creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/deeper/file.jsonl");
        ensure_parent_dir(&target).await.unwrap();
        assert!(target.parent().unwrap().is_dir());
    }
}
