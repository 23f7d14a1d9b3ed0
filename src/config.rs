//! TOML configuration: one file, typed sections, validated on load.
//!
//! The config is an explicit value handed to the orchestrator; there is
//! no module-level state. Runtime mutation is split into two steps:
//! [`Config::set`] changes the in-memory value, [`Config::save`] persists
//! it; [`Config::reload`] re-reads the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    /// Ordered root spaces to harvest. Nested spaces are discovered at
    /// run time.
    #[serde(default)]
    pub spaces: Vec<SpaceConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceConfig {
    /// Confluence base URL, e.g. `https://example.atlassian.net/wiki`.
    #[serde(default)]
    pub base_url: String,
    /// Account the API token belongs to. The token itself comes from the
    /// `CONFLUENCE_API_TOKEN` environment variable.
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_source_timeout() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            llm_model: default_llm_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_llm_model() -> String {
    "llama2".to_string()
}
fn default_embedding_timeout() -> u64 {
    120
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_distance")]
    pub distance: String,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            collection: default_collection(),
            dims: default_dims(),
            distance: default_distance(),
            timeout_secs: default_index_timeout(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "confluence_docs".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_distance() -> String {
    "Cosine".to_string()
}
fn default_index_timeout() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_depth")]
    pub max_space_depth: u32,
    #[serde(default = "default_depth")]
    pub max_page_depth: u32,
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_space_depth: default_depth(),
            max_page_depth: default_depth(),
            progress_path: default_progress_path(),
        }
    }
}

fn default_depth() -> u32 {
    3
}
fn default_progress_path() -> PathBuf {
    PathBuf::from("progress/ingestion_progress.json")
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: u64,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_length: default_context_length(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> u64 {
    10
}
fn default_context_length() -> u32 {
    16384
}
fn default_max_context_chars() -> usize {
    50_000
}

/// One configured root space. Everything but the key is optional display
/// metadata.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpaceConfig {
    pub key: String,
    pub name: String,
    #[serde(default = "default_space_type", rename = "type")]
    pub space_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_space_status")]
    pub status: String,
}

fn default_space_type() -> String {
    "global".to_string()
}
fn default_space_status() -> String {
    "current".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// A usable config for tests and commands that tolerate missing files.
    pub fn minimal() -> Self {
        Config::default()
    }

    fn validate(&self) -> Result<()> {
        if self.index.dims == 0 {
            bail!("index.dims must be > 0");
        }
        match self.index.distance.as_str() {
            "Cosine" | "Dot" | "Euclid" => {}
            other => bail!(
                "Unknown index.distance: '{}'. Must be Cosine, Dot, or Euclid.",
                other
            ),
        }
        if self.ingest.max_space_depth == 0 || self.ingest.max_page_depth == 0 {
            bail!("ingest.max_space_depth and ingest.max_page_depth must be >= 1");
        }
        if self.query.top_k == 0 {
            bail!("query.top_k must be >= 1");
        }
        if self.query.max_context_chars == 0 {
            bail!("query.max_context_chars must be > 0");
        }
        for space in &self.spaces {
            if space.key.is_empty() {
                bail!("every [[spaces]] entry needs a non-empty key");
            }
        }
        Ok(())
    }

    /// Re-read the file this config came from, replacing the in-memory
    /// value.
    #[allow(dead_code)]
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        *self = load_config(path)?;
        Ok(())
    }

    /// Change one value in memory, addressed as `section.key`. Persisting
    /// is a separate call to [`Config::save`].
    pub fn set(&mut self, key_path: &str, value: &str) -> Result<()> {
        let parse_u64 = |v: &str| -> Result<u64> {
            v.parse()
                .with_context(|| format!("'{}' is not a number", v))
        };

        match key_path {
            "source.base_url" => self.source.base_url = value.to_string(),
            "source.username" => self.source.username = value.to_string(),
            "source.timeout_secs" => self.source.timeout_secs = parse_u64(value)?,
            "embedding.url" => self.embedding.url = value.to_string(),
            "embedding.model" => self.embedding.model = value.to_string(),
            "embedding.llm_model" => self.embedding.llm_model = value.to_string(),
            "embedding.timeout_secs" => self.embedding.timeout_secs = parse_u64(value)?,
            "index.url" => self.index.url = value.to_string(),
            "index.collection" => self.index.collection = value.to_string(),
            "index.dims" => self.index.dims = parse_u64(value)? as usize,
            "index.distance" => self.index.distance = value.to_string(),
            "ingest.max_space_depth" => self.ingest.max_space_depth = parse_u64(value)? as u32,
            "ingest.max_page_depth" => self.ingest.max_page_depth = parse_u64(value)? as u32,
            "ingest.progress_path" => self.ingest.progress_path = PathBuf::from(value),
            "query.top_k" => self.query.top_k = parse_u64(value)?,
            "query.context_length" => self.query.context_length = parse_u64(value)? as u32,
            "query.max_context_chars" => {
                self.query.max_context_chars = parse_u64(value)? as usize
            }
            other => bail!(
                "Unknown config key: '{}'. Use <section>.<key>, e.g. query.top_k.",
                other
            ),
        }

        self.validate()
    }

    /// Write the current in-memory config back to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
        assert_eq!(Config::default().index.dims, 768);
        assert_eq!(Config::default().ingest.max_space_depth, 3);
    }

    #[test]
    fn set_then_save_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cqa.toml");

        let mut config = Config::minimal();
        config.set("query.top_k", "25").unwrap();
        config.set("embedding.llm_model", "mistral").unwrap();
        config.save(&path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.query.top_k, 25);
        assert_eq!(loaded.embedding.llm_model, "mistral");
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut config = Config::minimal();
        assert!(config.set("query.nope", "1").is_err());
        assert!(config.set("query.top_k", "lots").is_err());
        assert!(config.set("query.top_k", "0").is_err());
    }

    #[test]
    fn spaces_section_parses() {
        let toml = r#"
            [source]
            base_url = "https://wiki.example.com"
            username = "svc-bot"

            [[spaces]]
            key = "DOCS"
            name = "Documentation"

            [[spaces]]
            key = "OPS"
            name = "Operations"
            type = "global"
            status = "current"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.spaces.len(), 2);
        assert_eq!(config.spaces[0].key, "DOCS");
        assert_eq!(config.spaces[0].space_type, "global");
        assert_eq!(config.spaces[1].status, "current");
    }
}
