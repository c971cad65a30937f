use super::body_snippet;
use crate::logi;
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

const HUB: &str = "https://huggingface.co";
const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
const SAMPLE_BYTES: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub HTTP {status} during {stage}: {body}")]
    Http {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[error("Hub LFS rejected {oid}: {message}")]
    Lfs { oid: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RepoType {
    Dataset,
    Model,
    Space,
}

impl RepoType {
    fn api_segment(self) -> &'static str {
        match self {
            RepoType::Dataset => "datasets",
            RepoType::Model => "models",
            RepoType::Space => "spaces",
        }
    }

    fn url_prefix(self) -> &'static str {
        match self {
            RepoType::Dataset => "datasets/",
            RepoType::Model => "",
            RepoType::Space => "spaces/",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoRef {
    pub id: String,
    pub repo_type: RepoType,
    pub revision: String,
}

impl RepoRef {
    fn api_url(&self, action: &str) -> String {
        format!(
            "{HUB}/api/{}/{}/{action}/{}",
            self.repo_type.api_segment(),
            self.id,
            self.revision
        )
    }

    fn lfs_batch_url(&self) -> String {
        format!(
            "{HUB}/{}{}.git/info/lfs/objects/batch",
            self.repo_type.url_prefix(),
            self.id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path_in_repo: String,
    pub content: Vec<u8>,
    pub sha256: String,
}

impl UploadFile {
    pub fn new(path_in_repo: impl Into<String>, content: Vec<u8>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&content));
        Self {
            path_in_repo: path_in_repo.into(),
            content,
            sha256,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

pub struct HubClient {
    client: Client,
    token: String,
}

impl HubClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            token: token.to_string(),
        })
    }

    pub async fn preupload(&self, repo: &RepoRef, files: &[UploadFile]) -> Result<HashMap<String, UploadMode>> {
        let resp = self
            .client
            .post(repo.api_url("preupload"))
            .bearer_auth(&self.token)
            .json(&preupload_body(files))
            .send()
            .await
            .context("Hub preupload request failed")?;
        let root = expect_json(resp, "preupload").await?;
        Ok(parse_upload_modes(&root))
    }

    pub async fn lfs_upload(&self, repo: &RepoRef, files: &[&UploadFile]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let objects: Vec<Value> = files
            .iter()
            .map(|f| json!({ "oid": f.sha256, "size": f.size() }))
            .collect();
        let body = json!({
            "operation": "upload",
            "transfers": ["basic"],
            "hash_algo": "sha256",
            "objects": objects,
        });

        let resp = self
            .client
            .post(repo.lfs_batch_url())
            .basic_auth("access_token", Some(&self.token))
            .header("Accept", LFS_CONTENT_TYPE)
            .header("Content-Type", LFS_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .context("Hub LFS batch request failed")?;
        let root = expect_json(resp, "lfs batch").await?;

        let by_oid: HashMap<&str, &UploadFile> = files.iter().map(|f| (f.sha256.as_str(), *f)).collect();
        let empty = Vec::new();
        for object in root.get("objects").and_then(Value::as_array).unwrap_or(&empty) {
            let oid = object.get("oid").and_then(Value::as_str).unwrap_or_default();
            if let Some(err) = object.get("error") {
                let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown");
                return Err(HubError::Lfs {
                    oid: oid.to_string(),
                    message: message.to_string(),
                }
                .into());
            }

            let Some(file) = by_oid.get(oid) else {
                continue;
            };
            let Some(actions) = object.get("actions") else {
                logi(format!("LFS object already present: {}", file.path_in_repo));
                continue;
            };

            if let Some(upload) = actions.get("upload") {
                logi(format!("Uploading LFS object {} ({} bytes)", file.path_in_repo, file.size()));
                let href = action_href(upload)?;
                let mut req = self.client.put(href).body(file.content.clone());
                for (k, v) in action_headers(upload) {
                    req = req.header(k, v);
                }
                let resp = req.send().await.context("LFS upload failed")?;
                expect_success(resp, "lfs upload").await?;
            }

            if let Some(verify) = actions.get("verify") {
                let href = action_href(verify)?;
                let mut req = self
                    .client
                    .post(href)
                    .basic_auth("access_token", Some(&self.token))
                    .header("Content-Type", LFS_CONTENT_TYPE)
                    .body(json!({ "oid": file.sha256, "size": file.size() }).to_string());
                for (k, v) in action_headers(verify) {
                    req = req.header(k, v);
                }
                let resp = req.send().await.context("LFS verify failed")?;
                expect_success(resp, "lfs verify").await?;
            }
        }
        Ok(())
    }

    pub async fn commit(
        &self,
        repo: &RepoRef,
        summary: &str,
        files: &[UploadFile],
        modes: &HashMap<String, UploadMode>,
    ) -> Result<Value> {
        let resp = self
            .client
            .post(repo.api_url("commit"))
            .bearer_auth(&self.token)
            .header("Content-Type", "application/x-ndjson")
            .body(commit_payload(summary, files, modes))
            .send()
            .await
            .context("Hub commit request failed")?;
        expect_json(resp, "commit").await
    }
}

fn preupload_body(files: &[UploadFile]) -> Value {
    let entries: Vec<Value> = files
        .iter()
        .map(|f| {
            let sample = &f.content[..f.content.len().min(SAMPLE_BYTES)];
            json!({
                "path": f.path_in_repo,
                "sample": STANDARD.encode(sample),
                "size": f.size(),
            })
        })
        .collect();
    json!({ "files": entries })
}

fn parse_upload_modes(root: &Value) -> HashMap<String, UploadMode> {
    let mut out = HashMap::new();
    let Some(files) = root.get("files").and_then(Value::as_array) else {
        return out;
    };
    for f in files {
        let Some(path) = f.get("path").and_then(Value::as_str) else {
            continue;
        };
        let mode = match f.get("uploadMode").and_then(Value::as_str) {
            Some("lfs") => UploadMode::Lfs,
            _ => UploadMode::Regular,
        };
        out.insert(path.to_string(), mode);
    }
    out
}

pub fn commit_payload(summary: &str, files: &[UploadFile], modes: &HashMap<String, UploadMode>) -> String {
    let mut lines = vec![json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    })];

    for f in files {
        let mode = modes.get(&f.path_in_repo).copied().unwrap_or(UploadMode::Regular);
        lines.push(match mode {
            UploadMode::Regular => json!({
                "key": "file",
                "value": { "content": STANDARD.encode(&f.content), "path": f.path_in_repo, "encoding": "base64" },
            }),
            UploadMode::Lfs => json!({
                "key": "lfsFile",
                "value": { "path": f.path_in_repo, "algo": "sha256", "oid": f.sha256, "size": f.size() },
            }),
        });
    }

    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

fn action_href(action: &Value) -> Result<&str> {
    action
        .get("href")
        .and_then(Value::as_str)
        .context("LFS action without href")
}

fn action_headers(action: &Value) -> Vec<(String, String)> {
    action
        .get("header")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

async fn expect_success(resp: reqwest::Response, stage: &'static str) -> Result<String> {
    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(HubError::Http {
            stage,
            status: status.as_u16(),
            body: body_snippet(&raw),
        }
        .into());
    }
    Ok(raw)
}

async fn expect_json(resp: reqwest::Response, stage: &'static str) -> Result<Value> {
    let raw = expect_success(resp, stage).await?;
    serde_json::from_str(&raw).with_context(|| format!("Hub {stage} returned invalid JSON: {}", body_snippet(&raw)))
}
