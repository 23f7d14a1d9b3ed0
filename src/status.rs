//! Ledger and cursor reporting for `cqa status` and `cqa progress`.
//!
//! Reads the progress file only, so it works while an ingestion run is in
//! flight; the output reflects the last completed batch, not the
//! in-flight one. Collection stats are best-effort: an unreachable index
//! degrades the printout, never fails it.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::progress::ProgressStore;
use crate::qdrant::VectorIndex;

/// Print the ledger summary, the cursor estimate, and collection stats.
pub async fn run_status(config: &Config, index: &dyn VectorIndex) -> Result<()> {
    let record = ProgressStore::new(&config.ingest.progress_path).load();

    println!("Ingestion status");
    println!("================");
    println!();
    println!("  Last run:        {}", format_opt_ts(record.last_run));
    println!("  Last updated:    {}", format_opt_ts(record.last_updated));
    println!("  Documents:       {} (approximate)", record.total_documents);
    println!("  Spaces tracked:  {}", record.processed_spaces.len());
    println!("  Units tracked:   {}", record.processed_pages.len());

    match &record.current_progress {
        Some(cursor) => {
            println!();
            println!("  In progress:     {}%", cursor.percentage_complete);
            println!(
                "  Cursor:          space {}/{}  page {}/{}  batch {}/{}",
                cursor.current_space_index,
                cursor.total_spaces,
                cursor.current_page_index,
                cursor.total_pages,
                cursor.current_batch_index,
                cursor.total_batches
            );
        }
        None => {
            println!();
            println!("  In progress:     no (last run completed or never started)");
        }
    }

    println!();
    match index.stats().await {
        Ok(Some(stats)) => {
            println!("  Collection:      {} points, status {}", stats.points_count, stats.status);
            println!("  Indexed vectors: {}", stats.indexed_vectors_count);
        }
        Ok(None) => println!("  Collection:      not created yet"),
        Err(e) => println!("  Collection:      unavailable ({})", e),
    }

    Ok(())
}

/// `run_status` plus the most recently processed units.
pub async fn run_progress(config: &Config, index: &dyn VectorIndex, last: usize) -> Result<()> {
    run_status(config, index).await?;

    let record = ProgressStore::new(&config.ingest.progress_path).load();
    if record.processed_pages.is_empty() {
        return Ok(());
    }

    let mut entries: Vec<_> = record.processed_pages.iter().collect();
    entries.sort_by(|a, b| b.1.last_processed.cmp(&a.1.last_processed));
    entries.truncate(last);

    println!();
    println!("  Recently processed:");
    println!(
        "  {:<18} {:<32} {:<10} {:<14} {}",
        "UNIT", "TITLE", "SPACE", "TYPE", "WHEN"
    );
    println!("  {}", "-".repeat(90));
    for (unit_id, entry) in entries {
        println!(
            "  {:<18} {:<32} {:<10} {:<14} {}",
            truncate(unit_id, 18),
            truncate(&entry.metadata.page_title, 32),
            truncate(&entry.metadata.space_key, 10),
            entry.metadata.content_type,
            format_ts_relative(entry.last_processed)
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn format_opt_ts(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    }
}

/// Relative time string, e.g. "3 hours ago".
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = Utc::now().timestamp() - ts.timestamp();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
