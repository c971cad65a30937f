use super::{TextGenerator, body_snippet};
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Gemini HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Gemini returned no text ({0})")]
    EmptyResponse(String),
    #[error("Gemini operation failed: {0}")]
    Operation(String),
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self::with_client(client, api_key))
    }

    pub fn with_client(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .context("Gemini request failed")?;
        read_json(resp).await
    }

    pub async fn generate_content(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{ENDPOINT}/models/{model}:generateContent");
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let root = self.post_json(&url, &body).await?;
        match extract_text(&root) {
            Some(text) => Ok(text),
            None => Err(GeminiError::EmptyResponse(block_reason(&root)).into()),
        }
    }

    pub async fn start_video_generation(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{ENDPOINT}/models/{model}:predictLongRunning");
        let body = json!({ "instances": [{ "prompt": prompt }] });

        let root = self.post_json(&url, &body).await?;
        root.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GeminiError::Operation("response carried no operation name".into()).into())
    }

    pub async fn get_operation(&self, name: &str) -> Result<Value> {
        let url = format!("{ENDPOINT}/{name}");
        let resp = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Gemini operation poll failed")?;
        read_json(resp).await
    }

    pub async fn download(&self, uri: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(uri)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Gemini file download failed")?;
        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(GeminiError::Http {
                status: status.as_u16(),
                body: body_snippet(&raw),
            }
            .into());
        }
        let bytes = resp.bytes().await.context("Gemini download read failed")?;
        Ok(bytes.to_vec())
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        logw(format!("Gemini HTTP {}", status.as_u16()));
        return Err(GeminiError::Http {
            status: status.as_u16(),
            body: body_snippet(&raw),
        }
        .into());
    }
    serde_json::from_str(&raw).with_context(|| format!("Gemini returned invalid JSON: {}", body_snippet(&raw)))
}

pub fn extract_text(root: &Value) -> Option<String> {
    let parts = root
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

fn block_reason(root: &Value) -> String {
    root.get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
        .map(|r| format!("blocked: {r}"))
        .unwrap_or_else(|| "no candidates".to_string())
}

pub fn operation_video_uri(op: &Value) -> Result<Option<String>> {
    if let Some(err) = op.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(GeminiError::Operation(msg.to_string()).into());
    }
    if !op.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(None);
    }

    let uri = op
        .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(Value::as_str)
        .ok_or_else(|| GeminiError::Operation("finished without a generated video".into()))?;
    Ok(Some(uri.to_string()))
}

pub struct GeminiModel {
    pub client: GeminiClient,
    pub model: String,
}

#[async_trait]
impl TextGenerator for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.client.generate_content(&self.model, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let root = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"genre\":" }, { "text": "\"Drama\"}" }] } }]
        });
        assert_eq!(extract_text(&root).unwrap(), "{\"genre\":\"Drama\"}");
    }

    #[test]
    fn reports_block_reason() {
        let root = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(extract_text(&root).is_none());
        let err = GeminiError::EmptyResponse(block_reason(&root));
        assert_eq!(err.to_string(), "Gemini returned no text (blocked: SAFETY)");
    }

    #[test]
    fn operation_states() {
        assert_eq!(operation_video_uri(&json!({ "name": "operations/1" })).unwrap(), None);

        let done = json!({
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [{ "video": { "uri": "https://x/v.mp4" } }] } }
        });
        assert_eq!(operation_video_uri(&done).unwrap().as_deref(), Some("https://x/v.mp4"));

        let failed = json!({ "done": true, "error": { "message": "quota" } });
        assert!(operation_video_uri(&failed).unwrap_err().to_string().contains("quota"));
    }
}
