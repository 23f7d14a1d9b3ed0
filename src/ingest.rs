//! The batch ingestor: walks spaces → pages → content units, embeds what
//! changed, and upserts in bounded batches.
//!
//! One logical thread of control: discovery, hashing, embedding, and
//! upserts all run sequentially within a run. Batch sizes bound memory
//! and pacing, not parallelism. The progress record (ledger + cursor) is
//! persisted after every page batch, so an interrupted run loses at most
//! one in-flight batch and resumes from the saved space/page/batch
//! offsets.
//!
//! Error policy: failure to create the index collection is fatal; every
//! per-space, per-page, and per-unit error is a logged skip. Full mode
//! without an explicit force, and daily mode inside its cooldown, are
//! refusals, not errors.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::confluence::ContentSource;
use crate::discover;
use crate::fingerprint;
use crate::models::{
    ContentUnit, IngestReport, PageRef, RunOutcome, Space, SpaceSummary, StagedDoc, UnitMetadata,
};
use crate::ollama::Embedder;
use crate::progress::{self, ProgressRecord, ProgressStore};
use crate::qdrant::VectorIndex;
use crate::report::{IngestEvent, IngestReporter};
use crate::resume::{self, ResumePoint};

/// Spaces processed per outer batch. Pacing only; correctness does not
/// depend on it.
pub const SPACE_BATCH_SIZE: usize = 2;
/// Pages processed per inner batch; also the upsert granularity and the
/// most work a crash can lose.
pub const PAGE_BATCH_SIZE: usize = 5;
/// Daily mode refuses to run again inside this window unless forced.
pub const DAILY_COOLDOWN_HOURS: i64 = 24;

/// How a run decides which units to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Re-embed everything. Requires an explicit force.
    Full,
    /// Only units whose fingerprint changed since the last run.
    Incremental,
    /// Incremental plus a 24 h cooldown between runs.
    Daily,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Full => "full",
            IngestMode::Incremental => "incremental",
            IngestMode::Daily => "daily",
        }
    }

    fn change_detection(&self) -> bool {
        matches!(self, IngestMode::Incremental | IngestMode::Daily)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub mode: IngestMode,
    pub force: bool,
    /// When false, the saved cursor is discarded (the ledger is kept, so
    /// change detection still applies).
    pub resume: bool,
}

/// Why a unit produced no staged document.
enum SkipReason {
    Unchanged,
    NoVector,
    EmbedError,
}

/// Typed outcome of processing one content unit.
enum UnitOutcome {
    Embedded(StagedDoc),
    Skipped(SkipReason),
}

/// Work-list totals computed in the planning pre-pass, used for the
/// cursor's percentage estimate.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    spaces: usize,
    pages: usize,
    batches: usize,
}

struct RunCtx<'a> {
    config: &'a Config,
    source: &'a dyn ContentSource,
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    reporter: &'a dyn IngestReporter,
    stop: &'a AtomicBool,
    store: ProgressStore,
    totals: Totals,
    change_detection: bool,
}

/// Run one ingestion pass. Returns a refusal for mode-gate violations,
/// the run report otherwise; only top-level failures (collection setup,
/// missing configuration) surface as `Err`.
pub async fn run_ingest(
    config: &Config,
    source: &dyn ContentSource,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    reporter: &dyn IngestReporter,
    stop: &AtomicBool,
    opts: &IngestOptions,
) -> Result<RunOutcome> {
    if opts.mode == IngestMode::Full && !opts.force {
        return Ok(RunOutcome::Refused {
            reason: "full mode re-embeds the entire corpus; pass --force to confirm".to_string(),
        });
    }

    if config.spaces.is_empty() {
        bail!("no [[spaces]] configured, nothing to ingest");
    }

    let store = ProgressStore::new(&config.ingest.progress_path);
    let mut record = store.load();

    if opts.mode == IngestMode::Daily && !opts.force {
        if let Some(last_run) = record.last_run {
            let elapsed = Utc::now() - last_run;
            if elapsed < Duration::hours(DAILY_COOLDOWN_HOURS) {
                return Ok(RunOutcome::Refused {
                    reason: format!(
                        "daily mode already ran {} hours ago (cooldown {} h); pass --force to override",
                        elapsed.num_hours(),
                        DAILY_COOLDOWN_HOURS
                    ),
                });
            }
        }
    }

    // Collection setup is the one index call that may abort the run.
    if !index.collection_exists().await? {
        index.create_collection().await?;
    }

    // Planning: every configured root, then its nested spaces, parents
    // before children.
    let mut all_spaces: Vec<Space> = Vec::new();
    for root in &config.spaces {
        all_spaces.push(Space {
            key: root.key.clone(),
            name: root.name.clone(),
            space_type: root.space_type.clone(),
            parent_key: None,
            depth: 0,
            url: root.url.clone(),
            description: root.description.clone(),
            status: root.status.clone(),
        });
        let nested =
            discover::expand_spaces(source, &root.key, config.ingest.max_space_depth).await;
        all_spaces.extend(nested);
    }

    let start = if opts.resume {
        resume::plan(&record)
    } else {
        progress::reset_cursor(&mut record);
        ResumePoint::start()
    };
    if start.space_index > 0 || start.page_index > 0 {
        eprintln!(
            "Resuming at space {}, page {}, batch {}",
            start.space_index, start.page_index, start.batch_index
        );
    }

    // Pre-pass: page totals for the percentage estimate. Failures here
    // only degrade the estimate.
    let mut totals = Totals {
        spaces: all_spaces.len(),
        ..Totals::default()
    };
    for space in &all_spaces {
        reporter.report(IngestEvent::Discovering {
            space: space.key.clone(),
        });
        let pages =
            discover::expand_pages(source, &space.key, config.ingest.max_page_depth).await;
        totals.pages += pages.len();
        totals.batches += pages.len().div_ceil(PAGE_BATCH_SIZE);
    }

    let ctx = RunCtx {
        config,
        source,
        embedder,
        index,
        reporter,
        stop,
        store,
        totals,
        change_detection: opts.mode.change_detection(),
    };

    let mut report = IngestReport::default();
    let total_space_batches = all_spaces.len().div_ceil(SPACE_BATCH_SIZE) as u64;
    let mut first_space = true;
    let mut space_index = start.space_index;

    while space_index < all_spaces.len() {
        if ctx.stop.load(Ordering::Relaxed) {
            report.stopped = true;
            break;
        }

        if first_space || space_index % SPACE_BATCH_SIZE == 0 {
            ctx.reporter.report(IngestEvent::SpaceBatch {
                batch: (space_index / SPACE_BATCH_SIZE + 1) as u64,
                total: total_space_batches,
            });
        }

        let page_start = if first_space { start.page_index } else { 0 };
        ctx.process_space(
            &mut record,
            &mut report,
            &all_spaces[space_index],
            space_index,
            page_start,
        )
        .await;
        first_space = false;

        if report.stopped {
            break;
        }
        space_index += 1;
    }

    // Finalize: stamp the run, clear the cursor on clean completion so
    // the next pass walks the whole corpus again (the ledger still makes
    // unchanged units skips).
    record.last_run = Some(Utc::now());
    if !report.stopped {
        progress::reset_cursor(&mut record);
    }
    if let Err(e) = ctx.store.save(&record) {
        eprintln!("Warning: could not save progress at end of run: {}", e);
    }

    print_summary(opts.mode, &report);
    Ok(RunOutcome::Finished(report))
}

impl RunCtx<'_> {
    async fn process_space(
        &self,
        record: &mut ProgressRecord,
        report: &mut IngestReport,
        space: &Space,
        space_index: usize,
        page_start: usize,
    ) {
        let pages =
            discover::expand_pages(self.source, &space.key, self.config.ingest.max_page_depth)
                .await;
        if pages.is_empty() {
            eprintln!("Warning: no pages found in {} ({})", space.name, space.key);
            return;
        }

        report.spaces.push(SpaceSummary {
            name: space.name.clone(),
            key: space.key.clone(),
            depth: space.depth,
            page_count: pages.len(),
        });

        let space_batches = pages.len().div_ceil(PAGE_BATCH_SIZE) as u64;
        let mut j = page_start;

        while j < pages.len() {
            if self.stop.load(Ordering::Relaxed) {
                report.stopped = true;
                return;
            }

            let end = (j + PAGE_BATCH_SIZE).min(pages.len());
            let batch_number = j / PAGE_BATCH_SIZE;
            let staged = self
                .process_page_batch(record, report, space, &pages[j..end])
                .await;

            let mut saved = true;
            if !staged.is_empty() {
                if let Err(e) = self.index.upsert(staged).await {
                    // Staged points are dropped, not retried; their ledger
                    // entries stay in memory until a later save flushes them.
                    eprintln!("Warning: batch upsert failed for {}: {}", space.name, e);
                    report.failed_batches += 1;
                    saved = false;
                }
            }

            if saved {
                progress::update_cursor(
                    record,
                    space_index,
                    end,
                    batch_number + 1,
                    self.totals.spaces,
                    self.totals.pages,
                    self.totals.batches,
                );
                if let Err(e) = self.store.save(record) {
                    eprintln!("Warning: could not save progress: {}", e);
                }
                self.reporter.report(IngestEvent::PageBatch {
                    space: space.key.clone(),
                    batch: (batch_number + 1) as u64,
                    total: space_batches,
                    percentage: record
                        .current_progress
                        .as_ref()
                        .map(|c| c.percentage_complete)
                        .unwrap_or(0.0),
                });
            }

            j = end;
        }
    }

    async fn process_page_batch(
        &self,
        record: &mut ProgressRecord,
        report: &mut IngestReport,
        space: &Space,
        batch: &[PageRef],
    ) -> Vec<StagedDoc> {
        let mut staged = Vec::new();

        for page in batch {
            let units = match self.source.fetch_page_with_attachments(page).await {
                Ok(units) => units,
                Err(e) => {
                    eprintln!(
                        "Warning: could not fetch page {} ({}) in {}: {}",
                        page.title, page.id, space.name, e
                    );
                    report.failed += 1;
                    continue;
                }
            };

            for unit in units {
                match self.process_unit(record, space, &unit).await {
                    UnitOutcome::Embedded(doc) => {
                        staged.push(doc);
                        report.updated += 1;
                    }
                    UnitOutcome::Skipped(SkipReason::Unchanged) => report.skipped += 1,
                    UnitOutcome::Skipped(_) => report.failed += 1,
                }
            }
        }

        staged
    }

    /// Fingerprint, change-check, embed, and stage one unit. The ledger
    /// entry is applied in memory here, in the same step as staging, so
    /// the two stay consistent; persistence follows the batch upsert.
    async fn process_unit(
        &self,
        record: &mut ProgressRecord,
        space: &Space,
        unit: &ContentUnit,
    ) -> UnitOutcome {
        let fp = fingerprint::hash(&unit.text);

        if self.change_detection
            && !fingerprint::is_updated(&unit.unit_id, &fp, &record.processed_pages)
        {
            return UnitOutcome::Skipped(SkipReason::Unchanged);
        }

        let vector = match self.embedder.embed(&unit.text).await {
            Ok(vector) => vector,
            Err(e) => {
                eprintln!(
                    "Warning: embedding failed for {} in {}: {}",
                    unit.title, space.name, e
                );
                return UnitOutcome::Skipped(SkipReason::EmbedError);
            }
        };
        if vector.is_empty() {
            eprintln!(
                "Warning: no embedding returned for {} in {}",
                unit.title, space.name
            );
            return UnitOutcome::Skipped(SkipReason::NoVector);
        }

        let metadata = UnitMetadata {
            page_id: unit.unit_id.clone(),
            page_title: unit.title.clone(),
            space_key: space.key.clone(),
            space_name: space.name.clone(),
            space_depth: space.depth,
            parent_space: space.parent_key.clone(),
            url: unit.url.clone(),
            version: unit.version,
            content_type: unit.kind.as_str().to_string(),
            attachment_id: unit.attachment_id.clone(),
            attachment_title: unit.attachment_title.clone(),
        };

        progress::update_ledger(record, &space.key, &unit.unit_id, &fp, metadata.clone());

        UnitOutcome::Embedded(StagedDoc {
            text: format!(
                "Space: {}\nTitle: {}\n\n{}",
                space.name, unit.title, unit.text
            ),
            vector,
            metadata,
        })
    }
}

fn print_summary(mode: IngestMode, report: &IngestReport) {
    println!("ingest {}", mode.as_str());
    println!("  updated: {}", report.updated);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    if report.failed_batches > 0 {
        println!("  failed batches: {}", report.failed_batches);
    }
    if !report.spaces.is_empty() {
        println!("  spaces:");
        for space in &report.spaces {
            println!(
                "    - {} ({})  depth {}  pages {}",
                space.name, space.key, space.depth, space.page_count
            );
        }
    }
    if report.stopped {
        println!("  stopped early; progress saved, rerun to resume");
    }
    println!("ok");
}
