pub mod gemini;
pub mod huggingface;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub(crate) fn body_snippet(raw: &str) -> String {
    raw.chars().take(800).collect()
}
