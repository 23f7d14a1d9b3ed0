//! End-to-end pipeline tests over in-memory collaborators.
//!
//! The ingestor is exercised through the same traits the production
//! clients implement, with a temp-dir progress file, so these cover the
//! real persistence and resume paths without any network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use confluence_qa::config::{Config, SpaceConfig};
use confluence_qa::confluence::ContentSource;
use confluence_qa::discover;
use confluence_qa::fingerprint;
use confluence_qa::ingest::{run_ingest, IngestMode, IngestOptions};
use confluence_qa::models::{
    CollectionStats, ContentUnit, IngestReport, PageRef, RunOutcome, ScoredPoint, SpaceRef,
    StagedDoc, UnitKind,
};
use confluence_qa::ollama::Embedder;
use confluence_qa::progress::{ProgressRecord, ProgressStore};
use confluence_qa::qdrant::VectorIndex;
use confluence_qa::report::NoReporter;

// ─── Fakes ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    /// parent space key → child spaces
    child_spaces: HashMap<String, Vec<SpaceRef>>,
    /// space key → top-level pages
    top_pages: HashMap<String, Vec<PageRef>>,
    /// page id → child pages
    child_pages: HashMap<String, Vec<PageRef>>,
    /// page id → body text
    bodies: Mutex<HashMap<String, String>>,
    /// page id → (attachment id, extracted text)
    attachments: HashMap<String, Vec<(String, String)>>,
    /// page ids whose fetch fails
    fail_pages: HashSet<String>,
}

impl FakeSource {
    fn set_body(&self, page_id: &str, text: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(page_id.to_string(), text.to_string());
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn list_spaces(&self, parent_key: &str) -> Result<Vec<SpaceRef>> {
        Ok(self.child_spaces.get(parent_key).cloned().unwrap_or_default())
    }

    async fn list_top_level_pages(&self, space_key: &str) -> Result<Vec<PageRef>> {
        Ok(self.top_pages.get(space_key).cloned().unwrap_or_default())
    }

    async fn list_child_pages(&self, page_id: &str) -> Result<Vec<PageRef>> {
        Ok(self.child_pages.get(page_id).cloned().unwrap_or_default())
    }

    async fn fetch_page_with_attachments(&self, page: &PageRef) -> Result<Vec<ContentUnit>> {
        if self.fail_pages.contains(&page.id) {
            bail!("simulated fetch failure for {}", page.id);
        }

        let mut units = Vec::new();
        if let Some(body) = self.bodies.lock().unwrap().get(&page.id) {
            units.push(ContentUnit {
                unit_id: page.id.clone(),
                title: page.title.clone(),
                text: body.clone(),
                url: format!("http://wiki/pages/{}", page.id),
                version: page.version,
                kind: UnitKind::PageBody,
                attachment_id: None,
                attachment_title: None,
            });
        }
        for (attachment_id, text) in self.attachments.get(&page.id).cloned().unwrap_or_default() {
            units.push(ContentUnit {
                unit_id: format!("{}_{}", page.id, attachment_id),
                title: format!("{} - manual.pdf", page.title),
                text,
                url: format!("http://wiki/pages/{}", page.id),
                version: page.version,
                kind: UnitKind::PdfAttachment,
                attachment_id: Some(attachment_id),
                attachment_title: Some("manual.pdf".to_string()),
            });
        }
        Ok(units)
    }
}

struct FakeEmbedder {
    calls: AtomicU64,
    /// Return empty vectors (the endpoint's failure signal).
    empty: bool,
    /// Set the shared stop flag once this many embeds have happened.
    stop_after: Option<(u64, Arc<AtomicBool>)>,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            empty: false,
            stop_after: None,
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = &self.stop_after {
            if n >= *limit {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![text.len() as f32, 1.0, 0.5])
    }

    async fn generate(&self, _prompt: &str, _context_length: u32) -> Result<String> {
        Ok("generated answer".to_string())
    }
}

#[derive(Default)]
struct FakeIndex {
    exists: AtomicBool,
    points: Mutex<Vec<StagedDoc>>,
    upsert_calls: AtomicU64,
    fail_upserts: bool,
}

impl FakeIndex {
    fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn create_collection(&self) -> Result<()> {
        self.exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, docs: Vec<StagedDoc>) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts {
            bail!("simulated upsert failure");
        }
        self.points.lock().unwrap().extend(docs);
        Ok(())
    }

    async fn search(&self, _vector: &[f32], _limit: u64) -> Result<Vec<ScoredPoint>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> Result<Option<CollectionStats>> {
        if !self.exists.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(CollectionStats {
            points_count: self.point_count() as u64,
            status: "green".to_string(),
            indexed_vectors_count: self.point_count() as u64,
        }))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.ingest.progress_path = tmp.path().join("progress.json");
    config.spaces.push(SpaceConfig {
        key: "DOCS".to_string(),
        name: "Documentation".to_string(),
        space_type: "global".to_string(),
        url: String::new(),
        description: String::new(),
        status: "current".to_string(),
    });
    config
}

fn page(id: &str, space: &str) -> PageRef {
    PageRef {
        id: id.to_string(),
        title: format!("Page {}", id),
        parent_id: None,
        space_key: space.to_string(),
        version: 1,
    }
}

/// A single flat space with `n` pages, bodies "body of p1" .. "body of pN".
fn flat_source(space: &str, n: usize) -> FakeSource {
    let mut source = FakeSource::default();
    let pages: Vec<PageRef> = (1..=n).map(|i| page(&format!("p{}", i), space)).collect();
    for p in &pages {
        source.set_body(&p.id, &format!("body of {}", p.id));
    }
    source.top_pages.insert(space.to_string(), pages);
    source
}

fn opts(mode: IngestMode) -> IngestOptions {
    IngestOptions {
        mode,
        force: mode == IngestMode::Full,
        resume: true,
    }
}

async fn run(
    config: &Config,
    source: &FakeSource,
    embedder: &FakeEmbedder,
    index: &FakeIndex,
    options: IngestOptions,
) -> RunOutcome {
    let stop = AtomicBool::new(false);
    run_ingest(config, source, embedder, index, &NoReporter, &stop, &options)
        .await
        .unwrap()
}

fn finished(outcome: RunOutcome) -> IngestReport {
    match outcome {
        RunOutcome::Finished(report) => report,
        RunOutcome::Refused { reason } => panic!("unexpected refusal: {}", reason),
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_corpus_full_mode() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 3);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);

    assert_eq!(report.updated, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.spaces.len(), 1);
    assert_eq!(report.spaces[0].key, "DOCS");
    assert_eq!(report.spaces[0].page_count, 3);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert_eq!(record.processed_pages.len(), 3);
    assert_eq!(record.total_documents, 3);
    assert_eq!(record.processed_spaces["DOCS"].page_count, 3);
    assert!(record.last_run.is_some());
    // Clean completion clears the cursor so the next run walks everything.
    assert!(record.current_progress.is_none());

    assert_eq!(index.point_count(), 3);
    let points = index.points.lock().unwrap();
    assert!(points[0].text.starts_with("Space: Documentation\nTitle: "));
    assert_eq!(points[0].metadata.space_key, "DOCS");
}

#[tokio::test]
async fn full_mode_without_force_is_refused() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 3);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let options = IngestOptions {
        mode: IngestMode::Full,
        force: false,
        resume: true,
    };
    let outcome = run(&config, &source, &embedder, &index, options).await;
    assert!(matches!(outcome, RunOutcome::Refused { .. }));
    assert_eq!(embedder.calls(), 0);
    assert_eq!(index.upsert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn incremental_rerun_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 3);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let first =
        finished(run(&config, &source, &embedder, &index, opts(IngestMode::Incremental)).await);
    assert_eq!(first.updated, 3);

    let second =
        finished(run(&config, &source, &embedder, &index, opts(IngestMode::Incremental)).await);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 3);
    // No new embeddings and no new points on the second pass.
    assert_eq!(embedder.calls(), 3);
    assert_eq!(index.point_count(), 3);
}

#[tokio::test]
async fn incremental_after_edit_reembeds_only_the_change() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 3);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    finished(run(&config, &source, &embedder, &index, opts(IngestMode::Incremental)).await);

    let unchanged_fp = {
        let record = ProgressStore::new(&config.ingest.progress_path).load();
        record.processed_pages["p1"].content_hash.clone()
    };

    source.set_body("p2", "edited body of p2");
    let report =
        finished(run(&config, &source, &embedder, &index, opts(IngestMode::Incremental)).await);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert_eq!(
        record.processed_pages["p2"].content_hash,
        fingerprint::hash("edited body of p2")
    );
    assert_eq!(record.processed_pages["p1"].content_hash, unchanged_fp);
}

#[tokio::test]
async fn daily_cooldown_refuses_then_force_overrides() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 2);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let store = ProgressStore::new(&config.ingest.progress_path);
    let mut record = ProgressRecord::default();
    record.last_run = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    store.save(&record).unwrap();

    let outcome = run(&config, &source, &embedder, &index, opts(IngestMode::Daily)).await;
    assert!(matches!(outcome, RunOutcome::Refused { .. }));
    assert_eq!(embedder.calls(), 0);
    assert!(store.load().processed_pages.is_empty());

    let forced = IngestOptions {
        mode: IngestMode::Daily,
        force: true,
        resume: true,
    };
    let report = finished(run(&config, &source, &embedder, &index, forced).await);
    assert_eq!(report.updated, 2);
}

#[tokio::test]
async fn stop_mid_run_then_resume_finishes_the_tail() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 12);
    let index = FakeIndex::default();

    // Request a stop once 10 units (two full page batches) are embedded;
    // the flag is honored at the next batch boundary.
    let stop = Arc::new(AtomicBool::new(false));
    let mut embedder = FakeEmbedder::new();
    embedder.stop_after = Some((10, Arc::clone(&stop)));

    let options = opts(IngestMode::Incremental);
    let outcome = run_ingest(
        &config,
        &source,
        &embedder,
        &index,
        &NoReporter,
        &stop,
        &options,
    )
    .await
    .unwrap();
    let report = finished(outcome);
    assert!(report.stopped);
    assert_eq!(report.updated, 10);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    let cursor = record.current_progress.clone().unwrap();
    assert_eq!(cursor.current_space_index, 0);
    assert_eq!(cursor.current_page_index, 10);
    assert_eq!(cursor.current_batch_index, 2);
    assert_eq!(cursor.total_pages, 12);
    assert_eq!(cursor.percentage_complete, 41.67);
    assert_eq!(record.processed_pages.len(), 10);

    // Resume: only the remaining two pages are processed.
    let embedder2 = FakeEmbedder::new();
    let report2 =
        finished(run(&config, &source, &embedder2, &index, opts(IngestMode::Incremental)).await);
    assert_eq!(report2.updated, 2);
    assert_eq!(report2.skipped, 0);
    assert_eq!(embedder2.calls(), 2);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert_eq!(record.processed_pages.len(), 12);
    assert!(record.current_progress.is_none());
    assert_eq!(index.point_count(), 12);
}

#[tokio::test]
async fn no_resume_resets_cursor_but_keeps_ledger() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 12);
    let index = FakeIndex::default();

    let stop = Arc::new(AtomicBool::new(false));
    let mut embedder = FakeEmbedder::new();
    embedder.stop_after = Some((5, Arc::clone(&stop)));
    let options = opts(IngestMode::Incremental);
    let outcome = run_ingest(
        &config,
        &source,
        &embedder,
        &index,
        &NoReporter,
        &stop,
        &options,
    )
    .await
    .unwrap();
    assert!(finished(outcome).stopped);

    // Fresh start of the cursor: the walk restarts at space 0, but the
    // ledger still skips the five already-embedded pages.
    let embedder2 = FakeEmbedder::new();
    let fresh = IngestOptions {
        mode: IngestMode::Incremental,
        force: false,
        resume: false,
    };
    let report = finished(run(&config, &source, &embedder2, &index, fresh).await);
    assert_eq!(report.skipped, 5);
    assert_eq!(report.updated, 7);
}

#[tokio::test]
async fn upsert_failure_drops_the_batch_and_continues() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 3);
    let embedder = FakeEmbedder::new();
    let index = FakeIndex {
        fail_upserts: true,
        ..FakeIndex::default()
    };

    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(index.point_count(), 0);
}

#[tokio::test]
async fn page_fetch_failure_skips_only_that_page() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let mut source = flat_source("DOCS", 3);
    source.fail_pages.insert("p2".to_string());
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(index.point_count(), 2);
}

#[tokio::test]
async fn empty_embedding_is_a_skip_not_a_failure() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let source = flat_source("DOCS", 2);
    let mut embedder = FakeEmbedder::new();
    embedder.empty = true;
    let index = FakeIndex::default();

    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);
    assert_eq!(report.updated, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(index.point_count(), 0);
    // Units that never made it into the index stay out of the ledger.
    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert!(record.processed_pages.is_empty());
}

#[tokio::test]
async fn pdf_attachments_are_tracked_independently() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let mut source = flat_source("DOCS", 1);
    source.attachments.insert(
        "p1".to_string(),
        vec![("att7".to_string(), "text from the pdf".to_string())],
    );
    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();

    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);
    assert_eq!(report.updated, 2);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert!(record.processed_pages.contains_key("p1"));
    assert!(record.processed_pages.contains_key("p1_att7"));
    assert_eq!(
        record.processed_pages["p1_att7"].metadata.content_type,
        "pdf_attachment"
    );
    assert_eq!(record.total_documents, 2);

    // Editing only the page body leaves the attachment's entry alone.
    source.set_body("p1", "new body");
    let report =
        finished(run(&config, &source, &embedder, &index, opts(IngestMode::Incremental)).await);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn nested_spaces_are_discovered_and_processed() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let mut source = flat_source("DOCS", 1);
    source.child_spaces.insert(
        "DOCS".to_string(),
        vec![SpaceRef {
            key: "SUB".to_string(),
            name: "Sub Space".to_string(),
            space_type: "global".to_string(),
            url: "http://wiki/display/SUB".to_string(),
            description: String::new(),
            status: "current".to_string(),
        }],
    );
    source
        .top_pages
        .insert("SUB".to_string(), vec![page("s1", "SUB")]);
    source.set_body("s1", "nested space page");

    let embedder = FakeEmbedder::new();
    let index = FakeIndex::default();
    let report = finished(run(&config, &source, &embedder, &index, opts(IngestMode::Full)).await);

    assert_eq!(report.updated, 2);
    assert_eq!(report.spaces.len(), 2);
    assert_eq!(report.spaces[1].key, "SUB");
    assert_eq!(report.spaces[1].depth, 1);

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    assert_eq!(record.processed_pages["s1"].metadata.space_key, "SUB");
    assert_eq!(
        record.processed_pages["s1"].metadata.parent_space.as_deref(),
        Some("DOCS")
    );
}

// ─── Discovery bounds ───────────────────────────────────────────────────

#[tokio::test]
async fn cyclic_space_tree_terminates_at_the_depth_bound() {
    let mut source = FakeSource::default();
    let space_ref = |key: &str| SpaceRef {
        key: key.to_string(),
        name: key.to_string(),
        space_type: "global".to_string(),
        url: String::new(),
        description: String::new(),
        status: "current".to_string(),
    };
    source
        .child_spaces
        .insert("ROOT".to_string(), vec![space_ref("A")]);
    source.child_spaces.insert("A".to_string(), vec![space_ref("B")]);
    // Back-reference: B points at A again.
    source.child_spaces.insert("B".to_string(), vec![space_ref("A")]);

    let spaces = discover::expand_spaces(&source, "ROOT", 3).await;
    // A@1, B@2, A@3: the revisit inside the bound is allowed, and the bound
    // stops further expansion.
    assert_eq!(spaces.len(), 3);
    assert_eq!(spaces[0].depth, 1);
    assert_eq!(spaces[2].depth, 3);
}

#[tokio::test]
async fn cyclic_page_tree_terminates_at_the_depth_bound() {
    let mut source = FakeSource::default();
    source
        .top_pages
        .insert("DOCS".to_string(), vec![page("p1", "DOCS")]);
    source
        .child_pages
        .insert("p1".to_string(), vec![page("p2", "DOCS")]);
    source
        .child_pages
        .insert("p2".to_string(), vec![page("p1", "DOCS")]);

    let pages = discover::expand_pages(&source, "DOCS", 3).await;
    assert_eq!(pages.len(), 4);
}

#[tokio::test]
async fn failed_subtree_is_abandoned_but_siblings_survive() {
    struct HalfBrokenSource {
        inner: FakeSource,
    }

    #[async_trait]
    impl ContentSource for HalfBrokenSource {
        async fn list_spaces(&self, parent_key: &str) -> Result<Vec<SpaceRef>> {
            if parent_key == "BROKEN" {
                bail!("simulated lookup failure");
            }
            self.inner.list_spaces(parent_key).await
        }
        async fn list_top_level_pages(&self, space_key: &str) -> Result<Vec<PageRef>> {
            self.inner.list_top_level_pages(space_key).await
        }
        async fn list_child_pages(&self, page_id: &str) -> Result<Vec<PageRef>> {
            self.inner.list_child_pages(page_id).await
        }
        async fn fetch_page_with_attachments(&self, page: &PageRef) -> Result<Vec<ContentUnit>> {
            self.inner.fetch_page_with_attachments(page).await
        }
    }

    let mut inner = FakeSource::default();
    let space_ref = |key: &str| SpaceRef {
        key: key.to_string(),
        name: key.to_string(),
        space_type: "global".to_string(),
        url: String::new(),
        description: String::new(),
        status: "current".to_string(),
    };
    inner.child_spaces.insert(
        "ROOT".to_string(),
        vec![space_ref("BROKEN"), space_ref("OK")],
    );
    inner
        .child_spaces
        .insert("OK".to_string(), vec![space_ref("OK_CHILD")]);

    let source = HalfBrokenSource { inner };
    let spaces = discover::expand_spaces(&source, "ROOT", 3).await;
    let keys: Vec<&str> = spaces.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["BROKEN", "OK", "OK_CHILD"]);
}
