//! # Confluence Q&A CLI (`cqa`)
//!
//! The `cqa` binary drives the harvest pipeline and the query surface.
//!
//! ## Usage
//!
//! ```bash
//! cqa --config ./config/cqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cqa check` | Verify the Confluence connection and credentials |
//! | `cqa init` | Create the vector collection (idempotent) |
//! | `cqa ingest` | Run the harvest pipeline (incremental by default) |
//! | `cqa status` | Print the ledger summary and resumption cursor |
//! | `cqa progress` | Status plus the most recently processed units |
//! | `cqa search "<query>"` | Nearest-neighbor search over the corpus |
//! | `cqa ask "<question>"` | Retrieve context and generate one answer |
//! | `cqa config show` | Print the effective configuration |
//! | `cqa config set <key> <value>` | Update one config value and persist it |
//!
//! Exit status is non-zero only for fatal top-level errors (bad config,
//! unreachable credentials, collection setup failure). Per-unit, per-page,
//! and per-space problems during ingestion are logged skips, and mode
//! refusals (full without `--force`, daily inside its cooldown) are
//! printed notices with a zero exit.

mod config;
mod confluence;
mod discover;
mod fingerprint;
mod ingest;
mod models;
mod ollama;
mod progress;
mod qdrant;
mod query;
mod report;
mod resume;
mod status;

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ingest::{IngestMode, IngestOptions};
use crate::models::RunOutcome;
use crate::report::ProgressMode;

/// Confluence Q&A: an incremental Confluence-to-vector-index harvester
/// with a CLI query surface.
#[derive(Parser)]
#[command(
    name = "cqa",
    about = "Incrementally harvest a Confluence content tree into a vector index and query it",
    version,
    long_about = "Walks configured Confluence spaces (including nested spaces, nested pages, and \
    PDF attachments), embeds changed content units, and upserts them into a Qdrant collection in \
    bounded batches. Progress is persisted after every batch, so interrupted runs resume from the \
    saved space/page/batch offsets."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Verify the Confluence connection and credentials.
    ///
    /// Fails with a non-zero exit when the base URL, username, or the
    /// `CONFLUENCE_API_TOKEN` environment variable is missing, or the
    /// probe request fails.
    Check,

    /// Create the vector collection if it does not exist.
    ///
    /// Idempotent; running it against an existing collection is safe.
    Init,

    /// Run the harvest pipeline.
    ///
    /// Incremental by default: unchanged units (by content fingerprint)
    /// are skipped. Progress is saved after every page batch; rerunning
    /// after an interruption resumes from the saved cursor.
    Ingest {
        /// Ingestion mode: `incremental`, `daily`, or `full`.
        #[arg(long, default_value = "incremental")]
        mode: String,

        /// Confirm a full re-embed, or override the daily cooldown.
        #[arg(long)]
        force: bool,

        /// Discard the saved cursor and start from the first space. The
        /// change-detection ledger is kept.
        #[arg(long)]
        no_resume: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Print the ledger summary and resumption cursor.
    ///
    /// Reads the progress file only, so it is safe to run while an
    /// ingestion run is in flight.
    Status,

    /// Status plus the most recently processed units.
    Progress {
        /// How many recent units to list.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },

    /// Nearest-neighbor search over the harvested corpus.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to `query.top_k`).
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Retrieve context for a question and generate one answer.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Show or update the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands.
#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Set one value (addressed as `section.key`) and write the file.
    Set {
        /// Key to change, e.g. `query.top_k` or `embedding.llm_model`.
        key: String,
        /// New value.
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config commands tolerate a missing file: `show` prints the
    // defaults, `set` creates the file from them.
    if let Commands::Config { action } = &cli.command {
        let mut cfg =
            config::load_config(&cli.config).unwrap_or_else(|_| config::Config::minimal());
        match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&cfg)?);
            }
            ConfigAction::Set { key, value } => {
                cfg.set(key, value)?;
                cfg.save(&cli.config)?;
                println!("Set {} = {}", key, value);
            }
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Check => {
            let source = confluence::ConfluenceClient::new(&cfg.source)?;
            source.check().await?;
            println!("Confluence connection OK ({})", source.base_url());
        }

        Commands::Init => {
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            if index.collection_exists().await? {
                println!("Collection '{}' already exists.", cfg.index.collection);
            } else {
                index.create_collection().await?;
                println!("Collection '{}' created.", cfg.index.collection);
            }
        }

        Commands::Ingest {
            mode,
            force,
            no_resume,
            progress,
        } => {
            let mode = match mode.as_str() {
                "full" => IngestMode::Full,
                "incremental" => IngestMode::Incremental,
                "daily" => IngestMode::Daily,
                other => bail!(
                    "Unknown mode: '{}'. Must be incremental, daily, or full.",
                    other
                ),
            };
            let progress_mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => bail!(
                    "Unknown progress mode: '{}'. Must be off, human, or json.",
                    other
                ),
            };

            let source = confluence::ConfluenceClient::new(&cfg.source)?;
            let embedder = ollama::OllamaClient::new(&cfg.embedding)?;
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            let reporter = progress_mode.reporter();

            // An unreachable or unauthenticated content source aborts the
            // run up front; per-page failures later are logged skips.
            if let Err(e) = source.check().await {
                eprintln!("Progress saved; rerun the same command to resume.");
                return Err(e);
            }

            // Ctrl-C requests a cooperative stop at the next batch
            // boundary; a batch always runs to completion once started.
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("Stop requested, finishing the current batch...");
                        stop.store(true, Ordering::Relaxed);
                    }
                });
            }

            let opts = IngestOptions {
                mode,
                force,
                resume: !no_resume,
            };
            match ingest::run_ingest(
                &cfg,
                &source,
                &embedder,
                &index,
                reporter.as_ref(),
                &stop,
                &opts,
            )
            .await
            {
                Ok(RunOutcome::Refused { reason }) => {
                    println!("ingest refused: {}", reason);
                }
                Ok(RunOutcome::Finished(_)) => {}
                Err(e) => {
                    eprintln!("Progress saved; rerun the same command to resume.");
                    return Err(e);
                }
            }
        }

        Commands::Status => {
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            status::run_status(&cfg, &index).await?;
        }

        Commands::Progress { last } => {
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            status::run_progress(&cfg, &index, last).await?;
        }

        Commands::Search { query, limit } => {
            let embedder = ollama::OllamaClient::new(&cfg.embedding)?;
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            query::run_search(&cfg, &embedder, &index, &query, limit).await?;
        }

        Commands::Ask { question } => {
            let embedder = ollama::OllamaClient::new(&cfg.embedding)?;
            let index = qdrant::QdrantIndex::new(&cfg.index)?;
            query::run_ask(&cfg, &embedder, &index, &question).await?;
        }

        Commands::Config { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
