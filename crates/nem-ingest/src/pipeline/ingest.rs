// `ingest`: remote listing straight through to the price table

use super::objects::{is_fatal, ObjectKind};
use super::{ContiguousPrefix, FailedObject, Pipeline, RunSummary, COMMAND_INGEST};
use crate::config::RunOptions;
use crate::error::{IngestError, Result};
use crate::ledger::{NewRun, RunStatus, ARTIFACT_DB_TABLE, DISPATCH_PRICE_TABLE, NODE_RAW_OBJECT};
use crate::report::Stage;
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

impl Pipeline {
    /// Fetch, parse and upsert new remote archives in one run
    pub async fn ingest(&self, options: &RunOptions) -> Result<RunSummary> {
        self.repository()?;

        let watermark_name = options.report.watermark_name(Stage::Processed);
        let (selected, mut summary) = self
            .discover(options, watermark_name, COMMAND_INGEST)
            .await?;
        if selected.is_empty() || options.dry_run {
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&options.raw_dir).await?;

        let run_id = self
            .ledger
            .start_run(NewRun {
                command: COMMAND_INGEST.to_string(),
                raw_dir: Some(options.raw_dir.display().to_string()),
                max_files: i64::try_from(options.limit).ok(),
                cleanup: options.cleanup,
            })
            .await;
        summary.run_id = run_id;

        let mut prefix = ContiguousPrefix::default();
        let mut raw_object_ids: Vec<Uuid> = Vec::new();
        let mut landed: Vec<PathBuf> = Vec::new();

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

            let fetched = match self.fetcher.fetch(&url, &dest).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    let validation = e.is_validation();
                    let err = IngestError::ObjectFetch {
                        name: object.name.clone(),
                        source: e,
                    };
                    error!(validation, "{}", err);
                    summary.failed.push(FailedObject::new(&object.name, &err));
                    prefix.failure();
                    continue;
                },
            };

            match self.apply_object(&fetched.path, ObjectKind::Zip, run_id).await {
                Ok(applied) => {
                    if applied.duplicate {
                        summary.duplicates.push(object.name.clone());
                    } else {
                        applied.record(&mut summary.metrics);
                        summary.processed.push(object.name.clone());
                    }
                    raw_object_ids.extend(applied.raw_object_id);
                    landed.push(fetched.path);
                    prefix.success(object.timestamp);
                },
                Err(e) if is_fatal(&e) => {
                    error!("Ingest failed on {}: {}", object.name, e);
                    self.ledger
                        .finish_run(run_id, RunStatus::Failed, &summary.metrics, Some(&e.to_string()))
                        .await;
                    return Err(e);
                },
                Err(e) => {
                    error!("Failed to apply {}: {}", object.name, e);
                    summary.failed.push(FailedObject::new(&object.name, &e));
                    prefix.failure();
                },
            }
        }

        let table = self
            .ledger
            .register_db_artifact(run_id, ARTIFACT_DB_TABLE, DISPATCH_PRICE_TABLE)
            .await;
        self.ledger
            .link(run_id, NODE_RAW_OBJECT, &raw_object_ids, table)
            .await;

        self.conclude(options, watermark_name, &prefix, &mut summary)
            .await?;

        if options.cleanup && summary.failed.is_empty() {
            super::process::remove_files(&landed).await;
        }

        info!(
            processed = summary.processed.len(),
            duplicates = summary.duplicates.len(),
            failed = summary.failed.len(),
            inserted = summary.metrics.inserted,
            updated = summary.metrics.updated,
            "Ingest complete"
        );
        Ok(summary)
    }
}
