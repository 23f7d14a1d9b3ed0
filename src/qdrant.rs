//! Qdrant REST client: the vector index the harvest writes to and the
//! query path reads from.
//!
//! [`VectorIndex`] is the seam the pipeline is tested through. Point ids
//! are assigned sequentially from the collection's current point count at
//! upsert time, so re-ingestion overwrites by position rather than
//! accumulating; the payload carries the text plus flattened provenance
//! metadata.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::models::{CollectionStats, ScoredPoint, StagedDoc};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection. Callers treat a failure here as fatal for
    /// the whole run.
    async fn create_collection(&self) -> Result<()>;

    /// Submit one batch of staged documents. At-least-once: a retry after
    /// a crash may resubmit the same units under fresh ids.
    async fn upsert(&self, docs: Vec<StagedDoc>) -> Result<()>;

    async fn search(&self, vector: &[f32], limit: u64) -> Result<Vec<ScoredPoint>>;

    /// Collection counters, or `None` when the collection does not exist.
    async fn stats(&self) -> Result<Option<CollectionStats>>;
}

pub struct QdrantIndex {
    http: reqwest::Client,
    url: String,
    collection: String,
    dims: usize,
    distance: String,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        if config.url.is_empty() {
            bail!("index.url is not configured");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dims: config.dims,
            distance: config.distance.clone(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.url, self.collection)
    }

    async fn collection_info(&self) -> Result<Option<Value>> {
        let resp = self
            .http
            .get(self.collection_url())
            .send()
            .await
            .context("Could not reach the vector index")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Vector index error {}: {}", status, body);
        }

        let json: Value = resp.json().await?;
        Ok(json.get("result").cloned())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.collection_info().await?.is_some())
    }

    async fn create_collection(&self) -> Result<()> {
        let body = serde_json::json!({
            "vectors": { "size": self.dims, "distance": self.distance },
        });

        let resp = self
            .http
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .context("Could not reach the vector index")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Could not create collection {}: {} {}", self.collection, status, text);
        }
        Ok(())
    }

    async fn upsert(&self, docs: Vec<StagedDoc>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let next_id = self
            .stats()
            .await
            .ok()
            .flatten()
            .map(|s| s.points_count)
            .unwrap_or(0);

        let points: Vec<Value> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let mut payload = serde_json::json!({ "text": doc.text });
                if let Ok(Value::Object(meta)) = serde_json::to_value(&doc.metadata) {
                    if let Some(obj) = payload.as_object_mut() {
                        obj.extend(meta);
                    }
                }
                serde_json::json!({
                    "id": next_id + i as u64,
                    "vector": doc.vector,
                    "payload": payload,
                })
            })
            .collect();

        let resp = self
            .http
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await
            .context("Upsert request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Upsert failed: {} {}", status, text);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: u64) -> Result<Vec<ScoredPoint>> {
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let resp = self
            .http
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .context("Search request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Search failed: {} {}", status, text);
        }

        let json: Value = resp.json().await?;
        let hits = json
            .get("result")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .map(|hit| ScoredPoint {
                        id: hit.get("id").and_then(Value::as_u64).unwrap_or(0),
                        score: hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                        payload: hit.get("payload").cloned().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }

    async fn stats(&self) -> Result<Option<CollectionStats>> {
        let Some(info) = self.collection_info().await? else {
            return Ok(None);
        };

        Ok(Some(CollectionStats {
            points_count: info
                .get("points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            status: info
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            indexed_vectors_count: info
                .get("indexed_vectors_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }))
    }
}
