use crate::logi;
use crate::record::{char_len, prefix_chars};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

pub const DEFAULT_TOKENIZER: &str = "NousResearch/Meta-Llama-3-8B-Instruct";
pub const ESTIMATE: &str = "estimate";

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// The longest prefix of `text` that fits in `max_tokens`.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String>;
}

pub fn estimate_tokens(text: &str) -> usize {
    (char_len(text) / 4).max(1)
}

pub struct CharEstimate;

impl TokenCounter for CharEstimate {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        Ok(prefix_chars(text, max_tokens * 4).to_string())
    }
}

pub struct HfTokenizer {
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.as_ref().display(), e))?;
        Ok(Self { tokenizer })
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl TokenCounter for HfTokenizer {
    fn count(&self, text: &str) -> usize {
        self.encode(text, true)
            .map(|ids| ids.len())
            .unwrap_or_else(|_| estimate_tokens(text))
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        let ids = self.encode(text, false)?;
        if ids.len() <= max_tokens {
            return Ok(text.to_string());
        }
        self.tokenizer
            .decode(&ids[..max_tokens], true)
            .map_err(|e| anyhow::anyhow!("Decode error: {}", e))
    }
}

/// Resolves `source` to a token counter: `estimate`, a local `tokenizer.json`
/// (or a directory holding one), or a Hub model id.
pub async fn load_counter(source: &str, hf_token: Option<String>) -> Result<Box<dyn TokenCounter>> {
    if source == ESTIMATE {
        logi("Using character estimate (4 chars per token)");
        return Ok(Box::new(CharEstimate));
    }

    let path = resolve_tokenizer_file(source, hf_token).await?;
    logi(format!("Loading tokenizer: {}", path.display()));
    Ok(Box::new(HfTokenizer::from_file(&path)?))
}

async fn resolve_tokenizer_file(source: &str, hf_token: Option<String>) -> Result<PathBuf> {
    let local = Path::new(source);
    if local.is_file() {
        return Ok(local.to_path_buf());
    }
    if local.is_dir() {
        let candidate = local.join("tokenizer.json");
        if candidate.is_file() {
            return Ok(candidate);
        }
        anyhow::bail!("No tokenizer.json in {}", local.display());
    }

    let api = hf_hub::api::tokio::ApiBuilder::new()
        .with_token(hf_token)
        .build()
        .context("Failed to build Hub client")?;
    api.model(source.to_string())
        .get("tokenizer.json")
        .await
        .with_context(|| format!("Failed to fetch tokenizer.json for {source}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_never_returns_zero() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("ééééééééé"), 2);
    }

    #[test]
    fn char_estimate_truncates_on_char_boundaries() {
        let counter = CharEstimate;
        assert_eq!(counter.truncate("ééééééé", 1).unwrap(), "éééé");
        assert_eq!(counter.count("ééééééé"), 1);
    }

    #[tokio::test]
    async fn estimate_spec_needs_no_files() {
        let counter = load_counter(ESTIMATE, None).await.unwrap();
        assert_eq!(counter.count("twelve chars"), 3);
    }

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "a": 1, "b": 2, "c": 3 },
            "unk_token": "[UNK]"
        }
    }"#;

    #[tokio::test]
    async fn hub_tokenizer_counts_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), WORD_LEVEL).unwrap();
        let source = dir.path().to_string_lossy().into_owned();
        let counter = load_counter(&source, None).await.unwrap();

        assert_eq!(counter.count("a b c"), 3);
        assert_eq!(counter.truncate("a b c a b c", 5).unwrap(), "a b c a b");
        assert_eq!(counter.truncate("a b", 5).unwrap(), "a b");

        let output = vec!["a b c"; 20].join(" ");
        let kept = crate::chunk::truncate_output(counter.as_ref(), "a b", &output, 30);
        assert!(counter.count("a b") + counter.count(&kept) <= 30);
        assert!(output.starts_with(&kept));
        assert!(counter.count(&kept) > 20);
    }

    #[tokio::test]
    async fn directory_without_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().to_string_lossy().into_owned();
        assert!(load_counter(&source, None).await.is_err());
    }
}
