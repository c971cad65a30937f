use crate::api::gemini::{GeminiClient, operation_video_uri};
use crate::init::ensure_parent_dir;
use crate::{logi, logok};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str = "Drone shot following a classic red convertible driven by a man along a winding coastal road at sunset, waves crashing against the rocks below.\nThe convertible accelerates fast and the engine roars loudly.";

#[derive(Debug, Clone, Args)]
pub struct VideoArgs {
    #[arg(long, default_value = DEFAULT_PROMPT)]
    pub prompt: String,
    /// Veo model (defaults to the configured one)
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long, default_value = "realism_example.mp4")]
    pub out: PathBuf,
    /// Seconds between operation polls
    #[arg(long, default_value_t = 10)]
    pub poll_secs: u64,
}

#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn start(&self, model: &str, prompt: &str) -> Result<String>;
    async fn poll(&self, operation: &str) -> Result<Value>;
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl VideoBackend for GeminiClient {
    async fn start(&self, model: &str, prompt: &str) -> Result<String> {
        self.start_video_generation(model, prompt).await
    }

    async fn poll(&self, operation: &str) -> Result<Value> {
        self.get_operation(operation).await
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        self.download(uri).await
    }
}

pub async fn run(args: &VideoArgs, model: &str, backend: &dyn VideoBackend) -> Result<usize> {
    logi(format!("Starting video generation with {model}"));
    let operation = backend.start(model, &args.prompt).await?;

    let uri = loop {
        let state = backend.poll(&operation).await?;
        if let Some(uri) = operation_video_uri(&state)? {
            break uri;
        }
        logi("Waiting for video generation to complete...");
        tokio::time::sleep(Duration::from_secs(args.poll_secs)).await;
    };

    let bytes = backend.fetch(&uri).await?;
    ensure_parent_dir(&args.out).await?;
    tokio::fs::write(&args.out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    logok(format!("Generated video saved to {}", args.out.display()));
    Ok(bytes.len())
}
