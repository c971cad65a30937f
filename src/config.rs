use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default)]
    pub hf_token: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_veo_model")]
    pub veo_model: String,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}

fn default_veo_model() -> String {
    "veo-3.1-generate-preview".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false) {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            Config {
                gemini_model: default_gemini_model(),
                veo_model: default_veo_model(),
                ..Config::default()
            }
        };

        config.fill_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn fill_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.gemini_api_key.trim().is_empty() {
            if let Some(key) = lookup(GEMINI_KEY_ENV) {
                self.gemini_api_key = key;
            }
        }
        if self.hf_token.trim().is_empty() {
            if let Some(token) = lookup(HF_TOKEN_ENV) {
                self.hf_token = token;
            }
        }
    }

    pub fn require_gemini_key(&self) -> Result<&str> {
        let key = self.gemini_api_key.trim();
        if key.is_empty() {
            anyhow::bail!("gemini_api_key missing (set it in config.json or {GEMINI_KEY_ENV})");
        }
        Ok(key)
    }

    pub fn require_hf_token(&self) -> Result<&str> {
        let token = self.hf_token.trim();
        if token.is_empty() {
            anyhow::bail!("hf_token missing (set it in config.json or {HF_TOKEN_ENV})");
        }
        Ok(token)
    }
}
