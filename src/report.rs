//! Batch-level progress reporting for ingestion runs.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts; the run summary itself goes to stdout at the end. The
//! reporter is pluggable: human lines, JSON lines, or nothing.

use std::io::Write;

/// A single progress event during an ingestion run.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    /// Planning phase: expanding a space's page tree. Totals unknown.
    Discovering { space: String },
    /// Space batch n of total started.
    SpaceBatch { batch: u64, total: u64 },
    /// Page batch n of total for one space finished.
    PageBatch {
        space: String,
        batch: u64,
        total: u64,
        percentage: f64,
    },
}

/// Reports ingest progress. Implementations write to stderr.
pub trait IngestReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress: "ingest DOCS  page batch 3/12  (41.67%)".
pub struct StderrReporter;

impl IngestReporter for StderrReporter {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Discovering { space } => {
                format!("ingest {}  discovering pages...\n", space)
            }
            IngestEvent::SpaceBatch { batch, total } => {
                format!("ingest  space batch {}/{}\n", batch, total)
            }
            IngestEvent::PageBatch {
                space,
                batch,
                total,
                percentage,
            } => {
                format!(
                    "ingest {}  page batch {}/{}  ({}%)\n",
                    space,
                    format_number(*batch),
                    format_number(*total),
                    percentage
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonReporter;

impl IngestReporter for JsonReporter {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Discovering { space } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "space": space,
            }),
            IngestEvent::SpaceBatch { batch, total } => serde_json::json!({
                "event": "progress",
                "phase": "space_batch",
                "batch": batch,
                "total": total,
            }),
            IngestEvent::PageBatch {
                space,
                batch,
                total,
                percentage,
            } => serde_json::json!({
                "event": "progress",
                "phase": "page_batch",
                "space": space,
                "batch": batch,
                "total": total,
                "percentage": percentage,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoReporter;

impl IngestReporter for NoReporter {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestReporter> {
        match self {
            ProgressMode::Off => Box::new(NoReporter),
            ProgressMode::Human => Box::new(StderrReporter),
            ProgressMode::Json => Box::new(JsonReporter),
        }
    }
}
