//! Pipeline orchestration
//!
//! Three commands share one [`Pipeline`]:
//!
//! - `pull`: listing -> gate -> fetch into the inbox
//! - `process`: inbox files -> parse -> upsert
//! - `ingest`: listing -> gate -> fetch -> parse -> upsert in one run
//!
//! Objects are handled one at a time in ascending timestamp order. A stage
//! watermark only moves after the batch completes without a fatal error, and
//! only as far as the contiguous run of successful objects at the front of
//! the batch.

mod ingest;
mod objects;
mod process;
mod pull;

use crate::discovery::CatalogScanner;
use crate::error::IngestError;
use crate::fetch::Fetcher;
use crate::config::RunOptions;
use crate::ledger::{Ledger, RunMetrics, RunStatus};
use crate::parser::DispatchPriceParser;
use crate::storage::DispatchPriceRepository;
use crate::watermark::{advance_watermark, WatermarkStore};
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

pub const COMMAND_PULL: &str = "pull";
pub const COMMAND_PROCESS: &str = "process";
pub const COMMAND_INGEST: &str = "ingest";

/// How a run ended, short of a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    NothingToDo,
    DryRun,
    Success,
    /// At least one object failed; the rest were handled
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedObject {
    pub name: String,
    pub reason: String,
}

impl FailedObject {
    fn new(name: impl Into<String>, error: &IngestError) -> Self {
        let reason = match error {
            // The name is already carried alongside
            IngestError::ObjectFetch { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        Self {
            name: name.into(),
            reason,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub command: &'static str,
    pub run_id: Option<Uuid>,
    pub outcome: RunOutcome,
    /// Objects chosen for this run, in processing order
    pub selected: Vec<String>,
    pub processed: Vec<String>,
    /// Objects skipped because identical content was already applied
    pub duplicates: Vec<String>,
    pub failed: Vec<FailedObject>,
    pub metrics: RunMetrics,
    pub watermark_advanced_to: Option<NaiveDateTime>,
}

impl RunSummary {
    fn new(command: &'static str, outcome: RunOutcome) -> Self {
        Self {
            command,
            run_id: None,
            outcome,
            selected: Vec::new(),
            processed: Vec::new(),
            duplicates: Vec::new(),
            failed: Vec::new(),
            metrics: RunMetrics::default(),
            watermark_advanced_to: None,
        }
    }

    /// 0 for nothing to do or full success, 1 for partial failure
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::NothingToDo | RunOutcome::DryRun | RunOutcome::Success => 0,
            RunOutcome::PartialFailure => 1,
        }
    }

    fn failure_message(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let names: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{} ({})", f.name, f.reason))
            .collect();
        Some(format!("{} object(s) failed: {}", self.failed.len(), names.join(", ")))
    }
}

/// Exit status for a run that ended in an error
pub fn exit_code_for_error(error: &IngestError) -> i32 {
    match error {
        IngestError::Configuration(_) | IngestError::ListingFetch { .. } => 2,
        _ => 1,
    }
}

/// Tracks the newest timestamp of the unbroken successful prefix of a batch
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContiguousPrefix {
    intact: bool,
    newest: Option<NaiveDateTime>,
}

impl Default for ContiguousPrefix {
    fn default() -> Self {
        Self {
            intact: true,
            newest: None,
        }
    }
}

impl ContiguousPrefix {
    pub(crate) fn success(&mut self, ts: NaiveDateTime) {
        if self.intact && self.newest.is_none_or(|n| ts > n) {
            self.newest = Some(ts);
        }
    }

    pub(crate) fn failure(&mut self) {
        self.intact = false;
    }

    pub(crate) fn newest(&self) -> Option<NaiveDateTime> {
        self.newest
    }
}

/// Components shared by every command
pub struct Pipeline {
    base_url: String,
    scanner: CatalogScanner,
    fetcher: Fetcher,
    watermarks: Arc<dyn WatermarkStore>,
    repository: Option<Arc<dyn DispatchPriceRepository>>,
    ledger: Ledger,
    parser: DispatchPriceParser,
    cancel: CancellationToken,
    clock: fn() -> NaiveDateTime,
}

fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl Pipeline {
    pub fn new(
        base_url: impl Into<String>,
        scanner: CatalogScanner,
        fetcher: Fetcher,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            scanner,
            fetcher,
            watermarks,
            repository: None,
            ledger: Ledger::disabled(),
            parser: DispatchPriceParser::new(),
            cancel: CancellationToken::new(),
            clock: utc_now,
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn DispatchPriceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override "now" for backfill windows
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    fn repository(&self) -> Result<&Arc<dyn DispatchPriceRepository>, IngestError> {
        self.repository.as_ref().ok_or_else(|| {
            IngestError::Configuration("a database is required for this command".to_string())
        })
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    /// Move the stage watermark, then close the ledger run.
    ///
    /// A watermark write failure fails the run, so the ledger never shows
    /// `success` for a run whose gate did not move.
    async fn conclude(
        &self,
        options: &RunOptions,
        watermark_name: &str,
        prefix: &ContiguousPrefix,
        summary: &mut RunSummary,
    ) -> Result<(), IngestError> {
        if !options.may_advance_watermark() {
            info!("Watermark updates disabled for this run");
        } else if let Some(newest) = prefix.newest() {
            match advance_watermark(self.watermarks.as_ref(), watermark_name, newest).await {
                Ok(true) => summary.watermark_advanced_to = Some(newest),
                Ok(false) => {},
                Err(e) => {
                    error!("Failed to advance watermark {}: {}", watermark_name, e);
                    self.ledger
                        .finish_run(summary.run_id, RunStatus::Failed, &summary.metrics, Some(&e.to_string()))
                        .await;
                    return Err(e);
                },
            }
        }

        let failure = summary.failure_message();
        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        self.ledger
            .finish_run(summary.run_id, status, &summary.metrics, failure.as_deref())
            .await;

        summary.outcome = if summary.failed.is_empty() {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        };
        Ok(())
    }
}
