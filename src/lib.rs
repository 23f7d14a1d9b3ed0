//! # Confluence Q&A
//!
//! An incremental harvester that walks a Confluence content tree (nested
//! spaces, nested pages, PDF attachments), embeds each content unit, and
//! stores the vectors in a Qdrant collection, plus a small CLI query
//! surface over the result.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────┐
//! │ Confluence │──▶│   Pipeline    │──▶│ Qdrant  │
//! │ spaces/pdf │   │ hash+embed    │   │ vectors │
//! └────────────┘   └──────┬───────┘   └────┬────┘
//!                         │                │
//!                  ┌──────▼──────┐   ┌─────▼────┐
//!                  │ progress.json│   │ CLI query│
//!                  │ ledger+cursor│   │ (search, │
//!                  └─────────────┘   │   ask)   │
//!                                    └──────────┘
//! ```
//!
//! The pipeline is resumable: the change-detection ledger and the
//! space/page/batch cursor are persisted after every page batch, so an
//! interrupted run loses at most one in-flight batch.
//!
//! ## Quick Start
//!
//! ```bash
//! cqa check                        # verify Confluence credentials
//! cqa init                         # create the Qdrant collection
//! cqa ingest                       # incremental harvest (resumable)
//! cqa ingest --mode full --force   # re-embed everything
//! cqa status                       # ledger summary + cursor
//! cqa ask "how do crew rules work?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and runtime updates |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content hashing for change detection |
//! | [`progress`] | Durable ledger + resumption cursor |
//! | [`resume`] | Resume planning from the saved cursor |
//! | [`discover`] | Space and page tree expansion |
//! | [`confluence`] | Content source trait + Confluence REST client |
//! | [`ollama`] | Embedding/generation trait + Ollama client |
//! | [`qdrant`] | Vector index trait + Qdrant REST client |
//! | [`ingest`] | The batch ingestor |
//! | [`report`] | Stderr progress reporting |
//! | [`status`] | Status and detailed-progress commands |
//! | [`query`] | Search and ask commands |

pub mod config;
pub mod confluence;
pub mod discover;
pub mod fingerprint;
pub mod ingest;
pub mod models;
pub mod ollama;
pub mod progress;
pub mod qdrant;
pub mod query;
pub mod report;
pub mod resume;
pub mod status;
