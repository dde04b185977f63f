//! Run, artifact and lineage ledger
//!
//! Every pipeline execution is a run that starts `running` and is finished
//! exactly once as `success` or `failed`. Runs register the artifacts they
//! produce, and lineage edges record which inputs each artifact came from.
//!
//! Provenance is best effort. Pipelines talk to the ledger through
//! [`Ledger`], which absorbs and logs every failure.

mod memory;
mod observer;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use observer::Ledger;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Artifact type of an archive landed by `pull`
pub const ARTIFACT_RAW_ZIP: &str = "raw_zip";
/// Artifact type of the live price table
pub const ARTIFACT_DB_TABLE: &str = "db_table";
/// Logical name of the price table artifact
pub const DISPATCH_PRICE_TABLE: &str = "public.dispatch_price";

/// Node kinds used in lineage edges
pub const NODE_ARTIFACT: &str = "artifact";
pub const NODE_RAW_OBJECT: &str = "raw_object";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Run {0} is already finished")]
    AlreadyFinished(Uuid),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Artifact path does not exist: {0}")]
    ArtifactMissing(PathBuf),

    #[error("Invalid run status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("Ledger state poisoned")]
    Poisoned,
}

impl From<crate::error::IngestError> for LedgerError {
    fn from(err: crate::error::IngestError) -> Self {
        LedgerError::Hash(err.to_string())
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// Parameters recorded when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRun {
    pub command: String,
    pub raw_dir: Option<String>,
    pub max_files: Option<i64>,
    pub cleanup: bool,
}

impl NewRun {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            raw_dir: None,
            max_files: None,
            cleanup: false,
        }
    }
}

/// Counters recorded when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub files: u64,
    pub rows_parsed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub invalid: u64,
}

impl RunMetrics {
    pub fn rows_appended(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub command: String,
    pub status: RunStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub rows_appended: i64,
    pub error_message: Option<String>,
    pub metrics: RunMetrics,
    pub raw_dir: Option<String>,
    pub max_files: Option<i64>,
    pub cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub run_id: Uuid,
    pub artifact_type: String,
    pub path: String,
    /// None for database-resident artifacts
    pub content_hash: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageEdge {
    pub run_id: Uuid,
    pub from_type: String,
    pub from_id: Uuid,
    pub to_type: String,
    pub to_id: Uuid,
}

impl LineageEdge {
    /// Edge from any node into an artifact
    pub fn into_artifact(run_id: Uuid, from_type: &str, from_id: Uuid, artifact_id: Uuid) -> Self {
        Self {
            run_id,
            from_type: from_type.to_string(),
            from_id,
            to_type: NODE_ARTIFACT.to_string(),
            to_id: artifact_id,
        }
    }
}

/// `db://<name>` locator for a database-resident artifact
pub fn db_locator(name: &str) -> String {
    format!("db://{}", name)
}

fn check_artifact_path(path: &Path) -> LedgerResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(LedgerError::ArtifactMissing(path.to_path_buf()))
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn start_run(&self, run: NewRun) -> LedgerResult<Uuid>;

    /// Move a `running` run to a terminal status. Any other state is an error.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        metrics: &RunMetrics,
        error_message: Option<&str>,
    ) -> LedgerResult<()>;

    /// Register a file or directory artifact; the path must exist and is hashed
    async fn register_artifact(&self, run_id: Uuid, artifact_type: &str, path: &Path) -> LedgerResult<Uuid>;

    /// Register a database object by logical name, without a content hash
    async fn register_db_artifact(&self, run_id: Uuid, artifact_type: &str, name: &str) -> LedgerResult<Uuid>;

    /// Insert an edge; an existing identical edge is left as is
    async fn add_lineage(&self, edge: &LineageEdge) -> LedgerResult<()>;

    /// Most recently started run of `command`
    async fn latest_run_id(&self, command: &str) -> LedgerResult<Option<Uuid>>;

    /// Artifacts of one type produced by a run, ordered by path
    async fn artifact_ids_for_run(&self, run_id: Uuid, artifact_type: &str) -> LedgerResult<Vec<Uuid>>;

    async fn get_run(&self, run_id: Uuid) -> LedgerResult<Option<PipelineRun>>;
}
