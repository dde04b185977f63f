// `process`: apply inbox files to the price table

use super::objects::{is_fatal, ObjectKind};
use super::{
    ContiguousPrefix, FailedObject, Pipeline, RunOutcome, RunSummary, COMMAND_PROCESS, COMMAND_PULL,
};
use crate::config::RunOptions;
use crate::error::{IngestError, Result};
use crate::ledger::{
    NewRun, RunStatus, ARTIFACT_DB_TABLE, ARTIFACT_RAW_ZIP, DISPATCH_PRICE_TABLE, NODE_ARTIFACT,
    NODE_RAW_OBJECT,
};
use crate::models::RemoteObject;
use crate::report::{ReportType, Stage};
use crate::selection::{effective_gate, select_candidates, Gate};
use nem_common::timestamp::format_canonical;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Inbox contents grouped the way `process` consumes them
#[derive(Debug, Default, PartialEq)]
pub(crate) struct InboxListing {
    pub csvs: Vec<PathBuf>,
    /// Archives whose names carry a timestamp for the report
    pub archives: Vec<RemoteObject>,
}

/// List loose CSVs and report archives directly under `dir`.
///
/// Partial downloads (`.tmp`) and other files are ignored. Archives that do
/// not match the report's naming are logged and skipped.
pub(crate) async fn list_inbox(dir: &Path, report: ReportType) -> Result<InboxListing> {
    let mut listing = InboxListing::default();
    if !tokio::fs::try_exists(dir).await? {
        return Ok(listing);
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        match ObjectKind::of(&path) {
            Some(ObjectKind::Csv) => listing.csvs.push(path),
            Some(ObjectKind::Zip) => match report.parse_timestamp(&name) {
                Some(timestamp) => listing.archives.push(RemoteObject { name, timestamp }),
                None => warn!("Ignoring {}: not a {} archive", name, report),
            },
            None => {},
        }
    }

    listing.csvs.sort();
    Ok(listing)
}

/// Archives past the gate, in order, after loose CSVs took their share of `limit`
fn plan_archives(listing: &InboxListing, gate: &Gate, limit: usize) -> Vec<RemoteObject> {
    let remaining = limit.saturating_sub(listing.csvs.len());
    select_candidates(&listing.archives, gate, remaining)
}

pub(crate) async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("Removed {}", path.display()),
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Per-object bookkeeping shared by the CSV and archive loops
struct Progress {
    summary: RunSummary,
    raw_object_ids: Vec<Uuid>,
    handled: Vec<PathBuf>,
}

impl Pipeline {
    /// Apply loose CSVs and then gated archives from the inbox
    pub async fn process(&self, options: &RunOptions) -> Result<RunSummary> {
        self.repository()?;

        let watermark_name = options.report.watermark_name(Stage::Processed);
        let watermark = self.watermarks.get(watermark_name).await?;
        let gate = effective_gate(options.since, options.backfill_days, watermark, self.now());

        let listing = list_inbox(&options.raw_dir, options.report).await?;
        let csvs: Vec<PathBuf> = listing.csvs.iter().take(options.limit).cloned().collect();
        let archives = plan_archives(&listing, &gate, options.limit);

        info!(
            raw_dir = %options.raw_dir.display(),
            gate = %gate.cutoff.map(|g| format_canonical(&g)).unwrap_or_else(|| "none".to_string()),
            gate_source = %gate.source,
            "Found {} loose CSV files and {} archives ({} past the gate)",
            listing.csvs.len(),
            listing.archives.len(),
            archives.len()
        );

        let mut summary = RunSummary::new(COMMAND_PROCESS, RunOutcome::Success);
        summary.selected = csvs
            .iter()
            .map(|p| file_name(p))
            .chain(archives.iter().map(|a| a.name.clone()))
            .collect();

        if summary.selected.is_empty() {
            info!("Nothing to do");
            summary.outcome = RunOutcome::NothingToDo;
            return Ok(summary);
        }
        if options.dry_run {
            for name in &summary.selected {
                info!("[dry-run] would process {}", name);
            }
            summary.outcome = RunOutcome::DryRun;
            return Ok(summary);
        }

        let run_id = self
            .ledger
            .start_run(NewRun {
                command: COMMAND_PROCESS.to_string(),
                raw_dir: Some(options.raw_dir.display().to_string()),
                max_files: i64::try_from(options.limit).ok(),
                cleanup: options.cleanup,
            })
            .await;
        summary.run_id = run_id;

        let mut progress = Progress {
            summary,
            raw_object_ids: Vec::new(),
            handled: Vec::new(),
        };

        // Loose CSVs carry no timestamp and never touch the watermark.
        for (i, path) in csvs.iter().enumerate() {
            info!("[CSV {}/{}] Processing: {}", i + 1, csvs.len(), file_name(path));
            self.process_one(path, ObjectKind::Csv, run_id, &mut progress)
                .await?;
        }

        let mut prefix = ContiguousPrefix::default();
        for (j, object) in archives.iter().enumerate() {
            info!("[ZIP {}/{}] Processing: {}", j + 1, archives.len(), object.name);
            let path = options.raw_dir.join(&object.name);
            if self
                .process_one(&path, ObjectKind::Zip, run_id, &mut progress)
                .await?
            {
                prefix.success(object.timestamp);
            } else {
                prefix.failure();
            }
        }

        let Progress {
            mut summary,
            raw_object_ids,
            handled,
        } = progress;

        let table = self
            .ledger
            .register_db_artifact(run_id, ARTIFACT_DB_TABLE, DISPATCH_PRICE_TABLE)
            .await;
        let upstream = self
            .ledger
            .upstream_artifacts(COMMAND_PULL, ARTIFACT_RAW_ZIP)
            .await;
        self.ledger.link(run_id, NODE_ARTIFACT, &upstream, table).await;
        self.ledger
            .link(run_id, NODE_RAW_OBJECT, &raw_object_ids, table)
            .await;

        self.conclude(options, watermark_name, &prefix, &mut summary)
            .await?;

        if options.cleanup {
            if summary.failed.is_empty() {
                remove_files(&handled).await;
            } else {
                info!("Cleanup skipped: the run had failures");
            }
        }

        info!(
            processed = summary.processed.len(),
            duplicates = summary.duplicates.len(),
            failed = summary.failed.len(),
            rows_parsed = summary.metrics.rows_parsed,
            inserted = summary.metrics.inserted,
            updated = summary.metrics.updated,
            "Process complete"
        );
        Ok(summary)
    }

    /// Apply one inbox file; `Ok(false)` means it failed and the run goes on
    async fn process_one(
        &self,
        path: &Path,
        kind: ObjectKind,
        run_id: Option<Uuid>,
        progress: &mut Progress,
    ) -> Result<bool> {
        let name = file_name(path);
        if self.cancel.is_cancelled() {
            warn!("Interrupted; inbox files were kept");
            self.ledger
                .finish_run(run_id, RunStatus::Failed, &progress.summary.metrics, Some("interrupted"))
                .await;
            return Err(IngestError::Interrupted);
        }

        match self.apply_object(path, kind, run_id).await {
            Ok(applied) => {
                if applied.duplicate {
                    progress.summary.duplicates.push(name);
                } else {
                    applied.record(&mut progress.summary.metrics);
                    progress.summary.processed.push(name);
                }
                progress.raw_object_ids.extend(applied.raw_object_id);
                progress.handled.push(path.to_path_buf());
                Ok(true)
            },
            Err(e) if is_fatal(&e) => {
                error!("Process failed on {}: {}", name, e);
                self.ledger
                    .finish_run(
                        run_id,
                        RunStatus::Failed,
                        &progress.summary.metrics,
                        Some(&e.to_string()),
                    )
                    .await;
                Err(e)
            },
            Err(e) => {
                error!("Failed to process {}: {}", name, e);
                progress.summary.failed.push(FailedObject::new(name, &e));
                Ok(false)
            },
        }
    }
}
