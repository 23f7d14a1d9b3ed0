//! Ollama client: the embedding and generation endpoint.
//!
//! [`Embedder`] is the seam the pipeline and query path use. The contract
//! for `embed` follows the endpoint's own convention: an empty vector
//! signals "no embedding produced" and the caller skips the unit with a
//! warning; transport errors are surfaced as errors and treated the same
//! way by the ingest loop.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. An empty vector means the endpoint produced
    /// nothing usable.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One-shot text generation with an explicit context window size.
    async fn generate(&self, prompt: &str, context_length: u32) -> Result<String>;
}

pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
    llm_model: String,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.url.is_empty() {
            bail!("embedding.url is not configured");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            llm_model: config.llm_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let resp = self
            .http
            .post(format!("{}/api/embeddings", self.url))
            .json(&body)
            .send()
            .await
            .context("Embedding request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Embedding endpoint error {}: {}", status, body);
        }

        let json: Value = resp.json().await?;
        let vector = json
            .get("embedding")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect()
            })
            .unwrap_or_default();

        Ok(vector)
    }

    async fn generate(&self, prompt: &str, context_length: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.llm_model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_ctx": context_length },
        });

        let resp = self
            .http
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .context("Generation request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Generation endpoint error {}: {}", status, body);
        }

        let json: Value = resp.json().await?;
        Ok(json
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
