//! Confluence REST client: the content source the pipeline harvests.
//!
//! [`ContentSource`] is the seam the ingest pipeline is written against;
//! [`ConfluenceClient`] is the production implementation over the
//! Confluence Cloud REST API. Page bodies arrive as storage-format XHTML
//! and are reduced to plain text; PDF attachments are downloaded and
//! their text extracted. All listing calls follow `start`/`limit`
//! pagination until the server reports no next page.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::models::{ContentUnit, PageRef, SpaceRef, UnitKind};

/// Environment variable holding the Confluence API token. Kept out of the
/// config file.
pub const API_TOKEN_ENV: &str = "CONFLUENCE_API_TOKEN";

/// Abstract content source consumed by discovery and ingestion.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Direct child spaces of a space.
    async fn list_spaces(&self, parent_key: &str) -> Result<Vec<SpaceRef>>;

    /// Top-level pages of a space.
    async fn list_top_level_pages(&self, space_key: &str) -> Result<Vec<PageRef>>;

    /// Direct child pages of a page.
    async fn list_child_pages(&self, page_id: &str) -> Result<Vec<PageRef>>;

    /// The page body plus any PDF attachments, as ready-to-embed units.
    /// Attachment text is already extracted; a page with no extractable
    /// body contributes no body unit.
    async fn fetch_page_with_attachments(&self, page: &PageRef) -> Result<Vec<ContentUnit>>;
}

/// Confluence Cloud client with HTTP Basic auth (username + API token).
pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
}

impl ConfluenceClient {
    /// Build a client from config. Fails fast when the base URL, username,
    /// or `CONFLUENCE_API_TOKEN` is missing, so the caller can treat that as a
    /// fatal startup error, not a per-item skip.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            bail!("source.base_url is not configured");
        }
        if config.username.is_empty() {
            bail!("source.username is not configured");
        }
        let token = std::env::var(API_TOKEN_ENV)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", API_TOKEN_ENV))?;

        let credentials = format!("{}:{}", config.username, token);
        let auth_header = format!("Basic {}", BASE64.encode(credentials.as_bytes()));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cheap auth probe used by `cqa check` and at the start of a run.
    pub async fn check(&self) -> Result<()> {
        self.get_json("/rest/api/space", &[("limit", "1")])
            .await
            .context("Could not reach Confluence")?;
        Ok(())
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", &self.auth_header)
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Confluence API error {} for {}: {}", status, url, body);
        }

        Ok(resp.json().await?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .with_context(|| format!("Download from {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("Confluence download error {} for {}", status, url);
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// List page attachments and return the PDF ones as content units.
    async fn pdf_attachment_units(&self, page: &PageRef) -> Result<Vec<ContentUnit>> {
        let json = self
            .get_json(
                &format!("/rest/api/content/{}/child/attachment", page.id),
                &[("limit", "100"), ("expand", "version")],
            )
            .await?;

        let mut units = Vec::new();
        for attachment in results_array(&json) {
            let title = str_field(attachment, "title");
            if !title.to_lowercase().ends_with(".pdf") {
                continue;
            }

            let Some(download_path) = attachment
                .pointer("/_links/download")
                .and_then(Value::as_str)
            else {
                continue;
            };
            let download_url = if download_path.starts_with('/') {
                format!("{}{}", self.base_url, download_path)
            } else {
                download_path.to_string()
            };

            let bytes = match self.download(&download_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("Warning: could not download attachment {}: {}", title, e);
                    continue;
                }
            };

            let text = match pdf_extract::extract_text_from_mem(&bytes) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("Warning: PDF extraction failed for {}: {}", title, e);
                    continue;
                }
            };
            if text.trim().is_empty() {
                continue;
            }

            let attachment_id = str_field(attachment, "id");
            units.push(ContentUnit {
                unit_id: format!("{}_{}", page.id, attachment_id),
                title: format!("{} - {}", page.title, title),
                text: text.trim().to_string(),
                url: self.page_url(&page.id),
                version: page.version,
                kind: UnitKind::PdfAttachment,
                attachment_id: Some(attachment_id),
                attachment_title: Some(title),
            });
        }

        Ok(units)
    }

    fn page_url(&self, page_id: &str) -> String {
        format!("{}/pages/viewpage.action?pageId={}", self.base_url, page_id)
    }
}

#[async_trait]
impl ContentSource for ConfluenceClient {
    async fn list_spaces(&self, parent_key: &str) -> Result<Vec<SpaceRef>> {
        let json = self
            .get_json(
                "/rest/api/space",
                &[
                    ("limit", "100"),
                    ("type", "global"),
                    ("spaceKey", parent_key),
                    ("expand", "description.plain"),
                ],
            )
            .await?;

        let spaces = results_array(&json)
            .iter()
            .map(|space| {
                let key = str_field(space, "key");
                SpaceRef {
                    url: format!("{}/display/{}", self.base_url, key),
                    key,
                    name: str_field(space, "name"),
                    space_type: str_or(space, "type", "global"),
                    description: space
                        .pointer("/description/plain/value")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status: str_or(space, "status", "unknown"),
                }
            })
            .collect();

        Ok(spaces)
    }

    async fn list_top_level_pages(&self, space_key: &str) -> Result<Vec<PageRef>> {
        let mut pages = Vec::new();
        let mut start: usize = 0;
        let limit: usize = 100;

        loop {
            let start_s = start.to_string();
            let limit_s = limit.to_string();
            let json = self
                .get_json(
                    "/rest/api/content",
                    &[
                        ("type", "page"),
                        ("spaceKey", space_key),
                        ("limit", &limit_s),
                        ("start", &start_s),
                        ("expand", "version,space"),
                    ],
                )
                .await?;

            let results = results_array(&json);
            if results.is_empty() {
                break;
            }
            for page in results {
                pages.push(page_ref(page, space_key));
            }

            if json.pointer("/_links/next").is_none() {
                break;
            }
            start += limit;
        }

        Ok(pages)
    }

    async fn list_child_pages(&self, page_id: &str) -> Result<Vec<PageRef>> {
        let json = self
            .get_json(
                &format!("/rest/api/content/{}/child/page", page_id),
                &[("limit", "1000"), ("expand", "version,space")],
            )
            .await?;

        Ok(results_array(&json)
            .iter()
            .map(|page| {
                let mut child = page_ref(page, "");
                child.parent_id = Some(page_id.to_string());
                child
            })
            .collect())
    }

    async fn fetch_page_with_attachments(&self, page: &PageRef) -> Result<Vec<ContentUnit>> {
        let json = self
            .get_json(
                &format!("/rest/api/content/{}", page.id),
                &[("expand", "body.storage,version,space")],
            )
            .await?;

        let mut units = Vec::new();

        let storage = json
            .pointer("/body/storage/value")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let text = match storage_to_text(storage) {
            Ok(text) => text,
            Err(e) => {
                eprintln!(
                    "Warning: could not extract body of page {} ({}): {}",
                    page.title, page.id, e
                );
                String::new()
            }
        };
        if !text.trim().is_empty() {
            units.push(ContentUnit {
                unit_id: page.id.clone(),
                title: page.title.clone(),
                text,
                url: self.page_url(&page.id),
                version: page.version,
                kind: UnitKind::PageBody,
                attachment_id: None,
                attachment_title: None,
            });
        }

        units.extend(self.pdf_attachment_units(page).await?);
        Ok(units)
    }
}

fn results_array(json: &Value) -> &[Value] {
    json.get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn str_or(json: &Value, key: &str, default: &str) -> String {
    json.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn page_ref(page: &Value, fallback_space_key: &str) -> PageRef {
    let space_key = page
        .pointer("/space/key")
        .and_then(Value::as_str)
        .unwrap_or(fallback_space_key)
        .to_string();
    PageRef {
        id: str_field(page, "id"),
        title: str_field(page, "title"),
        parent_id: None,
        space_key,
        version: page
            .pointer("/version/number")
            .and_then(Value::as_i64)
            .unwrap_or(1),
    }
}

/// Reduce a storage-format XHTML fragment to plain text: drop script and
/// style subtrees, keep text and CDATA, collapse all whitespace runs to
/// single spaces.
pub fn storage_to_text(storage: &str) -> Result<String> {
    if storage.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(storage.as_bytes());
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;
    let mut skip_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if (name.as_ref() == b"script" || name.as_ref() == b"style") && skip_depth > 0 {
                    skip_depth -= 1;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                let text = match te.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => String::from_utf8_lossy(te.as_ref()).into_owned(),
                };
                out.push_str(&text);
                out.push(' ');
            }
            Ok(quick_xml::events::Event::CData(cd)) if skip_depth == 0 => {
                let bytes = cd.into_inner();
                out.push_str(&String::from_utf8_lossy(&bytes));
                out.push(' ');
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("invalid storage markup: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_markup_is_reduced_to_text() {
        let storage = "<p>Hello <strong>world</strong></p><p>second   paragraph</p>";
        assert_eq!(
            storage_to_text(storage).unwrap(),
            "Hello world second paragraph"
        );
    }

    #[test]
    fn script_and_style_are_dropped() {
        let storage = "<p>keep</p><script>var x = 1;</script><style>p { color: red }</style><p>this</p>";
        assert_eq!(storage_to_text(storage).unwrap(), "keep this");
    }

    #[test]
    fn entities_are_unescaped() {
        let storage = "<p>a &amp; b &lt;c&gt;</p>";
        assert_eq!(storage_to_text(storage).unwrap(), "a & b <c>");
    }

    #[test]
    fn empty_storage_is_empty_text() {
        assert_eq!(storage_to_text("").unwrap(), "");
    }

    #[test]
    fn page_ref_reads_version_and_space() {
        let json: Value = serde_json::from_str(
            r#"{"id":"42","title":"T","version":{"number":7},"space":{"key":"DOCS"}}"#,
        )
        .unwrap();
        let page = page_ref(&json, "FALLBACK");
        assert_eq!(page.id, "42");
        assert_eq!(page.version, 7);
        assert_eq!(page.space_key, "DOCS");
    }

    #[test]
    fn page_ref_falls_back_when_space_missing() {
        let json: Value = serde_json::from_str(r#"{"id":"42","title":"T"}"#).unwrap();
        let page = page_ref(&json, "FALLBACK");
        assert_eq!(page.space_key, "FALLBACK");
        assert_eq!(page.version, 1);
    }
}
