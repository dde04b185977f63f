// `pull`: land new remote archives in the local inbox

use super::{ContiguousPrefix, FailedObject, Pipeline, RunOutcome, RunSummary, COMMAND_PULL};
use crate::config::RunOptions;
use crate::error::{IngestError, Result};
use crate::ledger::{NewRun, RunStatus, ARTIFACT_RAW_ZIP};
use crate::models::RemoteObject;
use crate::registry::{digest_path, SOURCE_FETCHED_ZIP};
use crate::report::Stage;
use crate::selection::{effective_gate, select_candidates};
use nem_common::timestamp::format_canonical;
use tracing::{error, info, warn};

impl Pipeline {
    /// Discover remote archives newer than the gate and fetch them into the inbox
    pub async fn pull(&self, options: &RunOptions) -> Result<RunSummary> {
        let watermark_name = options.report.watermark_name(Stage::Pull);
        let (selected, mut summary) = self
            .discover(options, watermark_name, COMMAND_PULL)
            .await?;
        if selected.is_empty() || options.dry_run {
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&options.raw_dir).await?;

        let run_id = self
            .ledger
            .start_run(NewRun {
                command: COMMAND_PULL.to_string(),
                raw_dir: Some(options.raw_dir.display().to_string()),
                max_files: i64::try_from(options.limit).ok(),
                cleanup: false,
            })
            .await;
        summary.run_id = run_id;

        let mut prefix = ContiguousPrefix::default();

        for object in &selected {
            if self.cancel.is_cancelled() {
                warn!("Interrupted; raw files were kept");
                self.ledger
                    .finish_run(run_id, RunStatus::Failed, &summary.metrics, Some("interrupted"))
                    .await;
                return Err(IngestError::Interrupted);
            }

            let url = options.report.object_url(&self.base_url, &object.name);
            let dest = options.raw_dir.join(&object.name);

            match self.fetcher.fetch(&url, &dest).await {
                Ok(fetched) => {
                    if let Ok(digest) = digest_path(&fetched.path).await {
                        self.ledger
                            .register_raw_object(SOURCE_FETCHED_ZIP, &fetched.path, &digest, run_id)
                            .await;
                    }
                    self.ledger
                        .register_artifact(run_id, ARTIFACT_RAW_ZIP, &fetched.path)
                        .await;

                    summary.metrics.files += 1;
                    summary.processed.push(object.name.clone());
                    prefix.success(object.timestamp);
                },
                Err(e) => {
                    let validation = e.is_validation();
                    let err = IngestError::ObjectFetch {
                        name: object.name.clone(),
                        source: e,
                    };
                    error!(validation, "{}", err);
                    summary.failed.push(FailedObject::new(&object.name, &err));
                    prefix.failure();
                },
            }
        }

        self.conclude(options, watermark_name, &prefix, &mut summary)
            .await?;

        info!(
            success = summary.processed.len(),
            failed = summary.failed.len(),
            "Pull complete"
        );
        Ok(summary)
    }

    /// Shared front half of `pull` and `ingest`: gate, scan, select.
    ///
    /// Returns an empty selection with the final summary when there is nothing
    /// to fetch or the run is a dry run.
    pub(crate) async fn discover(
        &self,
        options: &RunOptions,
        watermark_name: &str,
        command: &'static str,
    ) -> Result<(Vec<RemoteObject>, RunSummary)> {
        let watermark = self.watermarks.get(watermark_name).await?;
        let gate = effective_gate(options.since, options.backfill_days, watermark, self.now());

        info!(
            report = %options.report,
            watermark = %watermark.map(|w| format_canonical(&w)).unwrap_or_else(|| "none".to_string()),
            gate = %gate.cutoff.map(|g| format_canonical(&g)).unwrap_or_else(|| "none".to_string()),
            gate_source = %gate.source,
            "Resolved gate"
        );

        let objects = self.scanner.scan(options.report, &self.base_url).await?;
        let selected = select_candidates(&objects, &gate, options.limit);
        info!("Files to handle this run: {}", selected.len());

        let mut summary = RunSummary::new(command, RunOutcome::Success);
        summary.selected = selected.iter().map(|o| o.name.clone()).collect();

        if selected.is_empty() {
            info!("Nothing to do");
            summary.outcome = RunOutcome::NothingToDo;
        } else if options.dry_run {
            for object in &selected {
                info!(timestamp = %format_canonical(&object.timestamp), "[dry-run] would fetch {}", object.name);
            }
            summary.outcome = RunOutcome::DryRun;
        }

        Ok((selected, summary))
    }
}
