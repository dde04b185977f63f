//! NEM Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental ingestion of AEMO dispatch reports into PostgreSQL.
//!
//! # Building blocks
//!
//! - **Discovery**: scrape a report directory listing for archive names
//! - **Selection**: gate candidates against a watermark, override or backfill window
//! - **Fetch**: download with retry into a local inbox, validating every archive
//! - **Parsing**: schema-aware decoding of the multi-section dispatch CSV
//! - **Storage**: idempotent upsert keyed on the interval's natural key
//! - **Watermarks**: per-stage high-water marks in Postgres or a JSON file
//! - **Ledger**: optional run, artifact, lineage and raw-object tracking
//!
//! # Example
//!
//! ```no_run
//! use nem_ingest::config::{IngestConfig, RunOptions};
//! use nem_ingest::discovery::CatalogScanner;
//! use nem_ingest::fetch::Fetcher;
//! use nem_ingest::pipeline::Pipeline;
//! use nem_ingest::watermark::FileWatermarkStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nem_ingest::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let options = RunOptions::resolve(&config, None, Some(5), true, None, None, false, None, false)?;
//!     let pipeline = Pipeline::new(
//!         config.base_url.clone(),
//!         CatalogScanner::new(&config.http)?,
//!         Fetcher::new(&config.http, config.retry_policy())?,
//!         Arc::new(FileWatermarkStore::new(config.watermark_file.clone())),
//!     );
//!     let summary = pipeline.pull(&options).await?;
//!     println!("would fetch {:?}", summary.selected);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod selection;
pub mod storage;
pub mod watermark;

pub use error::{IngestError, Result};
pub use models::{NaturalKey, NormalizedRow, RemoteObject, UpsertStats};
pub use pipeline::{Pipeline, RunOutcome, RunSummary};
pub use report::{ReportType, Stage};
