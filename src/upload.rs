use crate::api::huggingface::{HubClient, RepoRef, RepoType, UploadFile, UploadMode};
use crate::{logi, logok};
use anyhow::{Context, Result, bail};
use clap::Args;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SKIPPED_DIRS: [&str; 2] = [".git", ".cache"];

#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// Folder whose contents become the repository root
    #[arg(long, default_value = "dataset")]
    pub folder: PathBuf,
    /// Target repository, e.g. `user/movie-scripts`
    #[arg(long)]
    pub repo_id: String,
    #[arg(long, value_enum, default_value_t = RepoType::Dataset)]
    pub repo_type: RepoType,
    #[arg(long, default_value = "main")]
    pub revision: String,
    /// Commit summary (defaults to a timestamped message)
    #[arg(long)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UploadReport {
    pub files: usize,
    pub lfs_files: usize,
    pub bytes: usize,
    pub commit_url: Option<String>,
}

pub fn collect_files(folder: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !folder.is_dir() {
        bail!("Upload folder not found: {}", folder.display());
    }

    let mut out = Vec::new();
    let walker = WalkDir::new(folder).into_iter().filter_entry(|e| {
        e.depth() == 0 || !SKIPPED_DIRS.iter().any(|d| e.file_name() == *d)
    });
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = pathdiff::diff_paths(entry.path(), folder)
            .with_context(|| format!("{} is not under {}", entry.path().display(), folder.display()))?;
        let in_repo = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((entry.path().to_path_buf(), in_repo));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

pub fn default_summary() -> String {
    format!("Upload folder ({})", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
}

pub async fn run(args: &UploadArgs, token: &str) -> Result<UploadReport> {
    let paths = collect_files(&args.folder)?;
    if paths.is_empty() {
        bail!("Nothing to upload in {}", args.folder.display());
    }

    let mut files = Vec::with_capacity(paths.len());
    for (path, in_repo) in &paths {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(UploadFile::new(in_repo.clone(), content));
    }
    let bytes: usize = files.iter().map(UploadFile::size).sum();
    logi(format!(
        "Uploading {} files ({} bytes) from {} to {}",
        files.len(),
        bytes,
        args.folder.display(),
        args.repo_id
    ));

    let repo = RepoRef {
        id: args.repo_id.clone(),
        repo_type: args.repo_type,
        revision: args.revision.clone(),
    };
    let client = HubClient::new(token)?;

    let modes = client.preupload(&repo, &files).await?;
    let lfs: Vec<&UploadFile> = files
        .iter()
        .filter(|f| modes.get(&f.path_in_repo) == Some(&UploadMode::Lfs))
        .collect();
    client.lfs_upload(&repo, &lfs).await?;

    let summary = args.message.clone().unwrap_or_else(default_summary);
    let commit = client.commit(&repo, &summary, &files, &modes).await?;
    let commit_url = commit
        .get("commitUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let report = UploadReport {
        files: files.len(),
        lfs_files: lfs.len(),
        bytes,
        commit_url,
    };
    logok(format!(
        "Committed {} files ({} via LFS): {}",
        report.files,
        report.lfs_files,
        report.commit_url.as_deref().unwrap_or("no commit url returned")
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_nested_files_with_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("data/splits")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join(".cache/huggingface")).unwrap();
        std::fs::write(root.join("README.md"), "# data").unwrap();
        std::fs::write(root.join("data/splits/train.jsonl"), "{}").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join(".cache/huggingface/x"), "y").unwrap();

        let files = collect_files(root).unwrap();
        let names: Vec<&str> = files.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["README.md", "data/splits/train.jsonl"]);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn summary_is_timestamped() {
        assert!(default_summary().starts_with("Upload folder ("));
    }
}
