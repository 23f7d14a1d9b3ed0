//! Durable ingestion progress: the change-detection ledger and the
//! resumption cursor, persisted as one JSON file.
//!
//! The record is rewritten after every page batch, not just at end of run,
//! so an interrupted run loses at most one in-flight batch. Loading never
//! fails the caller: an absent or unparseable file yields a zero-valued
//! record, and unknown fields are ignored for forward compatibility.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::UnitMetadata;

/// Per-space counters in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceProgress {
    pub last_processed: DateTime<Utc>,
    pub page_count: u64,
}

/// One ledger entry per content unit: the fingerprint of the last version
/// that was embedded and submitted to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub content_hash: String,
    pub last_processed: DateTime<Utc>,
    pub metadata: UnitMetadata,
}

/// The resumption cursor: where the last saved batch left off.
///
/// `percentage_complete` averages the space and page fractions into one
/// scalar, a coarse estimate of two nested loops, not a precise ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorState {
    pub current_space_index: usize,
    pub current_page_index: usize,
    pub current_batch_index: usize,
    pub total_spaces: usize,
    pub total_pages: usize,
    pub total_batches: usize,
    pub percentage_complete: f64,
}

/// The whole persisted record. `current_progress` is `None` until a run
/// has saved its first batch, and again after a run completes cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_spaces: BTreeMap<String, SpaceProgress>,
    /// Keyed by unit id, not page id: a page body and each of its PDF
    /// attachments are tracked independently.
    #[serde(default)]
    pub processed_pages: BTreeMap<String, LedgerEntry>,
    /// Incremented once per unit actually embedded. Approximate: a crash
    /// between upsert and save can double-count on the next run.
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub current_progress: Option<CursorState>,
}

/// Load/save handle for the progress file.
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted record. Corrupt state is treated as absent, not
    /// fatal: a warning goes to stderr and a zero-valued record comes back.
    pub fn load(&self) -> ProgressRecord {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return ProgressRecord::default(),
        };
        match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                eprintln!(
                    "Warning: could not parse progress file {}: {}; starting from an empty record",
                    self.path.display(),
                    e
                );
                ProgressRecord::default()
            }
        }
    }

    /// Persist the full record. Writes to a sibling temp file and renames
    /// it into place so a concurrent reader never sees a half-written file.
    pub fn save(&self, record: &ProgressRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create progress directory {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write progress file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace progress file {}", self.path.display()))?;
        Ok(())
    }
}

/// Record one embedded unit: bump the space counters, write the ledger
/// entry, and advance `total_documents`. In-memory only; persisting is
/// the caller's separate, explicit step.
pub fn update_ledger(
    record: &mut ProgressRecord,
    space_key: &str,
    unit_id: &str,
    fingerprint: &str,
    metadata: UnitMetadata,
) {
    let now = Utc::now();

    let space = record
        .processed_spaces
        .entry(space_key.to_string())
        .or_insert(SpaceProgress {
            last_processed: now,
            page_count: 0,
        });
    space.page_count += 1;
    space.last_processed = now;

    record.processed_pages.insert(
        unit_id.to_string(),
        LedgerEntry {
            content_hash: fingerprint.to_string(),
            last_processed: now,
            metadata,
        },
    );

    record.total_documents += 1;
    record.last_updated = Some(now);
}

/// Set the resumption cursor after a completed page batch. In-memory only.
pub fn update_cursor(
    record: &mut ProgressRecord,
    space_index: usize,
    page_index: usize,
    batch_index: usize,
    total_spaces: usize,
    total_pages: usize,
    total_batches: usize,
) {
    record.current_progress = Some(CursorState {
        current_space_index: space_index,
        current_page_index: page_index,
        current_batch_index: batch_index,
        total_spaces,
        total_pages,
        total_batches,
        percentage_complete: percentage(space_index, total_spaces, page_index, total_pages),
    });
    record.last_updated = Some(Utc::now());
}

/// Drop the cursor but keep the ledger, so a fresh-start run still gets
/// change detection.
pub fn reset_cursor(record: &mut ProgressRecord) {
    record.current_progress = None;
}

/// Average of the space and page fractions, as a percentage rounded to
/// two decimals. Zero totals contribute zero rather than dividing.
pub fn percentage(
    space_index: usize,
    total_spaces: usize,
    page_index: usize,
    total_pages: usize,
) -> f64 {
    let space_frac = if total_spaces > 0 {
        space_index as f64 / total_spaces as f64
    } else {
        0.0
    };
    let page_frac = if total_pages > 0 {
        page_index as f64 / total_pages as f64
    } else {
        0.0
    };
    let pct = (space_frac + page_frac) / 2.0 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;
    use tempfile::TempDir;

    fn meta() -> UnitMetadata {
        UnitMetadata {
            page_id: "1".to_string(),
            page_title: "Page".to_string(),
            space_key: "S".to_string(),
            space_name: "Space".to_string(),
            space_depth: 0,
            parent_space: None,
            url: "http://wiki/1".to_string(),
            version: 1,
            content_type: "page".to_string(),
            attachment_id: None,
            attachment_title: None,
        }
    }

    #[test]
    fn load_missing_file_returns_zero_record() {
        let tmp = TempDir::new().unwrap();
        let store = ProgressStore::new(tmp.path().join("nope.json"));
        let record = store.load();
        assert!(record.last_run.is_none());
        assert!(record.processed_pages.is_empty());
        assert_eq!(record.total_documents, 0);
        assert!(record.current_progress.is_none());
    }

    #[test]
    fn load_corrupt_file_returns_zero_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();
        let record = ProgressStore::new(&path).load();
        assert_eq!(record.total_documents, 0);
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ProgressStore::new(tmp.path().join("nested/dir/progress.json"));

        let mut record = ProgressRecord::default();
        update_ledger(&mut record, "S", "1", "abc123", meta());
        update_cursor(&mut record, 1, 5, 2, 4, 20, 8);
        store.save(&record).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.total_documents, 1);
        assert_eq!(loaded.processed_pages["1"].content_hash, "abc123");
        assert_eq!(loaded.processed_spaces["S"].page_count, 1);
        let cursor = loaded.current_progress.unwrap();
        assert_eq!(cursor.current_page_index, 5);
        assert_eq!(cursor.total_batches, 8);
    }

    #[test]
    fn load_tolerates_unknown_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("progress.json");
        std::fs::write(
            &path,
            r#"{"total_documents": 7, "some_future_field": {"a": 1}}"#,
        )
        .unwrap();
        let record = ProgressStore::new(&path).load();
        assert_eq!(record.total_documents, 7);
    }

    #[test]
    fn ledger_update_is_per_unit() {
        let mut record = ProgressRecord::default();
        update_ledger(&mut record, "S", "1", "h1", meta());
        let mut pdf = meta();
        pdf.attachment_id = Some("a9".to_string());
        update_ledger(&mut record, "S", "1_a9", "h2", pdf);

        assert_eq!(record.processed_pages.len(), 2);
        assert_eq!(record.processed_spaces["S"].page_count, 2);
        assert_eq!(record.total_documents, 2);
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(0, 0, 0, 0), 0.0);
        assert_eq!(percentage(1, 3, 0, 12), 16.67);
        assert_eq!(percentage(3, 3, 12, 12), 100.0);
        assert_eq!(percentage(0, 3, 10, 12), 41.67);
    }

    #[test]
    fn reset_cursor_keeps_ledger() {
        let mut record = ProgressRecord::default();
        update_ledger(&mut record, "S", "1", "h1", meta());
        update_cursor(&mut record, 0, 5, 1, 1, 12, 3);
        reset_cursor(&mut record);
        assert!(record.current_progress.is_none());
        assert_eq!(record.processed_pages.len(), 1);
    }
}
