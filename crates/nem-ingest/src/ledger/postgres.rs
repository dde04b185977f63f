// Postgres ledger (`pipeline_run`, `artifact`, `lineage_edge`)

use super::{
    check_artifact_path, db_locator, to_i64, LedgerError, LedgerResult, LedgerStore, LineageEdge,
    NewRun, PipelineRun, RunMetrics, RunStatus,
};
use crate::registry::digest_path;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{FromRow, PgPool};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_artifact(
        &self,
        run_id: Uuid,
        artifact_type: &str,
        path: &str,
        content_hash: Option<&str>,
        size_bytes: Option<i64>,
    ) -> LedgerResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO artifact (id, run_id, type, path, content_hash, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(artifact_type)
        .bind(path)
        .bind(content_hash)
        .bind(size_bytes)
        .fetch_one(&self.db)
        .await?;

        debug!(artifact_type, path, "Registered artifact {}", id);
        Ok(id)
    }
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    command: String,
    status: String,
    started_at: NaiveDateTime,
    finished_at: Option<NaiveDateTime>,
    rows_appended: i64,
    error_message: Option<String>,
    files: i64,
    rows_parsed: i64,
    inserted: i64,
    updated: i64,
    invalid: i64,
    raw_dir: Option<String>,
    max_files: Option<i64>,
    cleanup: bool,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = LedgerError;

    fn try_from(row: RunRow) -> LedgerResult<Self> {
        let count = |v: i64| u64::try_from(v).unwrap_or(0);
        Ok(PipelineRun {
            id: row.id,
            command: row.command,
            status: row.status.parse()?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            rows_appended: row.rows_appended,
            error_message: row.error_message,
            metrics: RunMetrics {
                files: count(row.files),
                rows_parsed: count(row.rows_parsed),
                inserted: count(row.inserted),
                updated: count(row.updated),
                invalid: count(row.invalid),
            },
            raw_dir: row.raw_dir,
            max_files: row.max_files,
            cleanup: row.cleanup,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn start_run(&self, run: NewRun) -> LedgerResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO pipeline_run (id, command, status, rows_appended, started_at, raw_dir, max_files, cleanup)
            VALUES ($1, $2, 'running', 0, now(), $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&run.command)
        .bind(&run.raw_dir)
        .bind(run.max_files)
        .bind(run.cleanup)
        .fetch_one(&self.db)
        .await?;

        Ok(id)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        metrics: &RunMetrics,
        error_message: Option<&str>,
    ) -> LedgerResult<()> {
        if !status.is_terminal() {
            return Err(LedgerError::InvalidStatus(status.to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE pipeline_run
            SET status = $2,
                finished_at = now(),
                rows_appended = $3,
                error_message = $4,
                files = $5,
                rows_parsed = $6,
                inserted = $7,
                updated = $8,
                invalid = $9
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(to_i64(metrics.rows_appended()))
        .bind(error_message)
        .bind(to_i64(metrics.files))
        .bind(to_i64(metrics.rows_parsed))
        .bind(to_i64(metrics.inserted))
        .bind(to_i64(metrics.updated))
        .bind(to_i64(metrics.invalid))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pipeline_run WHERE id = $1)")
                .bind(run_id)
                .fetch_one(&self.db)
                .await?;

        if exists {
            Err(LedgerError::AlreadyFinished(run_id))
        } else {
            Err(LedgerError::RunNotFound(run_id))
        }
    }

    async fn register_artifact(&self, run_id: Uuid, artifact_type: &str, path: &Path) -> LedgerResult<Uuid> {
        check_artifact_path(path)?;
        let digest = digest_path(path).await?;
        self.insert_artifact(
            run_id,
            artifact_type,
            &path.display().to_string(),
            Some(&digest.sha256),
            Some(to_i64(digest.size_bytes)),
        )
        .await
    }

    async fn register_db_artifact(&self, run_id: Uuid, artifact_type: &str, name: &str) -> LedgerResult<Uuid> {
        self.insert_artifact(run_id, artifact_type, &db_locator(name), None, None)
            .await
    }

    async fn add_lineage(&self, edge: &LineageEdge) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lineage_edge (run_id, from_type, from_id, to_type, to_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(edge.run_id)
        .bind(&edge.from_type)
        .bind(edge.from_id)
        .bind(&edge.to_type)
        .bind(edge.to_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn latest_run_id(&self, command: &str) -> LedgerResult<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM pipeline_run
            WHERE command = $1
            ORDER BY started_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(command)
        .fetch_optional(&self.db)
        .await?;

        Ok(id)
    }

    async fn artifact_ids_for_run(&self, run_id: Uuid, artifact_type: &str) -> LedgerResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM artifact
            WHERE run_id = $1 AND type = $2
            ORDER BY path ASC
            "#,
        )
        .bind(run_id)
        .bind(artifact_type)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    async fn get_run(&self, run_id: Uuid) -> LedgerResult<Option<PipelineRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, command, status, started_at, finished_at, rows_appended, error_message,
                   files, rows_parsed, inserted, updated, invalid, raw_dir, max_files, cleanup
            FROM pipeline_run
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }
}
