//! Core data models for the harvest pipeline.
//!
//! These types represent the spaces, pages, and content units that flow
//! from Confluence through embedding into the vector index, plus the
//! summary types a finished run reports.

use serde::{Deserialize, Serialize};

/// A space to process: a configured root or a nested space found by
/// expansion.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Space {
    pub key: String,
    pub name: String,
    pub space_type: String,
    /// Back-reference to the parent space key, not ownership.
    pub parent_key: Option<String>,
    /// 0 for configured roots, parent depth + 1 for discovered spaces.
    pub depth: u32,
    pub url: String,
    pub description: String,
    pub status: String,
}

/// Raw space data as returned by the content source for one child listing.
/// The discoverer combines this with parent key and depth to build a [`Space`].
#[derive(Debug, Clone)]
pub struct SpaceRef {
    pub key: String,
    pub name: String,
    pub space_type: String,
    pub url: String,
    pub description: String,
    pub status: String,
}

/// A page reference as returned by the listing calls. The body is fetched
/// separately when the page is actually processed.
#[derive(Debug, Clone)]
pub struct PageRef {
    pub id: String,
    pub title: String,
    /// Parent page id, by reference only.
    #[allow(dead_code)]
    pub parent_id: Option<String>,
    pub space_key: String,
    pub version: i64,
}

/// What kind of content a unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    PageBody,
    PdfAttachment,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::PageBody => "page",
            UnitKind::PdfAttachment => "pdf_attachment",
        }
    }
}

/// The atomic thing that gets embedded: a page body or one PDF attachment.
///
/// `unit_id` is unique across the whole corpus: the page id for bodies,
/// `{page_id}_{attachment_id}` for attachments.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    pub unit_id: String,
    pub title: String,
    pub text: String,
    pub url: String,
    pub version: i64,
    pub kind: UnitKind,
    pub attachment_id: Option<String>,
    pub attachment_title: Option<String>,
}

/// Provenance metadata stored both in the change-detection ledger and in
/// the vector index payload alongside the text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitMetadata {
    pub page_id: String,
    pub page_title: String,
    pub space_key: String,
    pub space_name: String,
    pub space_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_space: Option<String>,
    pub url: String,
    pub version: i64,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_title: Option<String>,
}

/// A document staged for one batch upsert: payload text, its vector, and
/// provenance. The index assigns the point id at upsert time.
#[derive(Debug, Clone)]
pub struct StagedDoc {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: UnitMetadata,
}

/// One nearest-neighbor hit from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Collection-level counters from the vector index.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub points_count: u64,
    pub status: String,
    pub indexed_vectors_count: u64,
}

/// Per-space entry in the run summary: only spaces that had at least one
/// page appear here.
#[derive(Debug, Clone)]
pub struct SpaceSummary {
    pub name: String,
    pub key: String,
    pub depth: u32,
    pub page_count: usize,
}

/// Counts and per-space breakdown for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Units embedded and staged for upsert.
    pub updated: u64,
    /// Units skipped because their fingerprint was unchanged.
    pub skipped: u64,
    /// Units dropped on a recoverable error (page fetch or embedding).
    pub failed: u64,
    /// Page batches whose upsert call failed (staged points dropped).
    pub failed_batches: u64,
    pub spaces: Vec<SpaceSummary>,
    /// True when a cooperative stop ended the run early.
    pub stopped: bool,
}

/// What `run_ingest` produced: a refusal is a no-op, not an error.
#[derive(Debug)]
pub enum RunOutcome {
    Refused { reason: String },
    Finished(IngestReport),
}
