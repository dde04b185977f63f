use super::{
    check_artifact_path, db_locator, to_i64, Artifact, LedgerError, LedgerResult, LedgerStore,
    LineageEdge, NewRun, PipelineRun, RunMetrics, RunStatus,
};
use crate::registry::digest_path;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    runs: HashMap<Uuid, PipelineRun>,
    /// Start order, used to pick the latest run deterministically
    run_order: Vec<Uuid>,
    artifacts: Vec<Artifact>,
    edges: Vec<LineageEdge>,
    edge_keys: HashSet<(String, Uuid, String, Uuid)>,
}

/// Ledger kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> LedgerResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Poisoned)
    }

    pub fn runs(&self) -> Vec<PipelineRun> {
        self.state()
            .map(|s| s.run_order.iter().filter_map(|id| s.runs.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.state().map(|s| s.artifacts.clone()).unwrap_or_default()
    }

    pub fn edges(&self) -> Vec<LineageEdge> {
        self.state().map(|s| s.edges.clone()).unwrap_or_default()
    }

    fn push_artifact(
        &self,
        run_id: Uuid,
        artifact_type: &str,
        path: String,
        content_hash: Option<String>,
        size_bytes: Option<i64>,
    ) -> LedgerResult<Uuid> {
        let mut state = self.state()?;
        let id = Uuid::new_v4();
        state.artifacts.push(Artifact {
            id,
            run_id,
            artifact_type: artifact_type.to_string(),
            path,
            content_hash,
            size_bytes,
            created_at: Utc::now().naive_utc(),
        });
        Ok(id)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn start_run(&self, run: NewRun) -> LedgerResult<Uuid> {
        let mut state = self.state()?;
        let id = Uuid::new_v4();
        state.runs.insert(
            id,
            PipelineRun {
                id,
                command: run.command,
                status: RunStatus::Running,
                started_at: Utc::now().naive_utc(),
                finished_at: None,
                rows_appended: 0,
                error_message: None,
                metrics: RunMetrics::default(),
                raw_dir: run.raw_dir,
                max_files: run.max_files,
                cleanup: run.cleanup,
            },
        );
        state.run_order.push(id);
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

        let mut state = self.state()?;
        let run = state.runs.get_mut(&run_id).ok_or(LedgerError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(LedgerError::AlreadyFinished(run_id));
        }

        run.status = status;
        run.finished_at = Some(Utc::now().naive_utc());
        run.rows_appended = to_i64(metrics.rows_appended());
        run.error_message = error_message.map(str::to_string);
        run.metrics = *metrics;
        Ok(())
    }

    async fn register_artifact(&self, run_id: Uuid, artifact_type: &str, path: &Path) -> LedgerResult<Uuid> {
        check_artifact_path(path)?;
        let digest = digest_path(path).await?;
        self.push_artifact(
            run_id,
            artifact_type,
            path.display().to_string(),
            Some(digest.sha256),
            Some(to_i64(digest.size_bytes)),
        )
    }

    async fn register_db_artifact(&self, run_id: Uuid, artifact_type: &str, name: &str) -> LedgerResult<Uuid> {
        self.push_artifact(run_id, artifact_type, db_locator(name), None, None)
    }

    async fn add_lineage(&self, edge: &LineageEdge) -> LedgerResult<()> {
        let mut state = self.state()?;
        let key = (edge.from_type.clone(), edge.from_id, edge.to_type.clone(), edge.to_id);
        if state.edge_keys.insert(key) {
            state.edges.push(edge.clone());
        }
        Ok(())
    }

    async fn latest_run_id(&self, command: &str) -> LedgerResult<Option<Uuid>> {
        let state = self.state()?;
        Ok(state
            .run_order
            .iter()
            .rev()
            .find(|id| state.runs.get(*id).is_some_and(|r| r.command == command))
            .copied())
    }

    async fn artifact_ids_for_run(&self, run_id: Uuid, artifact_type: &str) -> LedgerResult<Vec<Uuid>> {
        let state = self.state()?;
        let mut matching: Vec<&Artifact> = state
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id && a.artifact_type == artifact_type)
            .collect();
        matching.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matching.into_iter().map(|a| a.id).collect())
    }

    async fn get_run(&self, run_id: Uuid) -> LedgerResult<Option<PipelineRun>> {
        Ok(self.state()?.runs.get(&run_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{ARTIFACT_DB_TABLE, ARTIFACT_RAW_ZIP, DISPATCH_PRICE_TABLE, NODE_ARTIFACT};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_poisoned_state_is_reported_as_such() {
        let store = InMemoryLedgerStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.state.lock().unwrap();
            panic!("poisoning lock for test");
        }));
        let result = store.start_run(NewRun::new("pull")).await;
        assert!(matches!(result, Err(LedgerError::Poisoned)));
        assert!(store.runs().is_empty());
    }

    #[tokio::test]
    async fn test_run_finishes_exactly_once() {
        let store = InMemoryLedgerStore::new();
        let id = store.start_run(NewRun::new("process")).await.unwrap();
        assert_eq!(store.get_run(id).await.unwrap().unwrap().status, RunStatus::Running);

        let metrics = RunMetrics {
            files: 1,
            inserted: 3,
            updated: 1,
            ..RunMetrics::default()
        };
        store.finish_run(id, RunStatus::Success, &metrics, None).await.unwrap();

        let again = store.finish_run(id, RunStatus::Failed, &metrics, Some("late")).await;
        assert!(matches!(again, Err(LedgerError::AlreadyFinished(_))));

        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.rows_appended, 4);
        assert!(run.finished_at.is_some());
        assert!(run.error_message.is_none());
    }

    #[tokio::test]
    async fn test_finish_rejects_running_and_unknown() {
        let store = InMemoryLedgerStore::new();
        let id = store.start_run(NewRun::new("pull")).await.unwrap();
        let metrics = RunMetrics::default();

        assert!(matches!(
            store.finish_run(id, RunStatus::Running, &metrics, None).await,
            Err(LedgerError::InvalidStatus(_))
        ));
        assert!(matches!(
            store.finish_run(Uuid::new_v4(), RunStatus::Success, &metrics, None).await,
            Err(LedgerError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_artifacts_and_lineage() {
        let dir = TempDir::new().unwrap();
        let b = dir.path().join("b.zip");
        let a = dir.path().join("a.zip");
        std::fs::write(&b, b"bbb").unwrap();
        std::fs::write(&a, b"aaa").unwrap();

        let store = InMemoryLedgerStore::new();
        let pull = store.start_run(NewRun::new("pull")).await.unwrap();
        let b_id = store.register_artifact(pull, ARTIFACT_RAW_ZIP, &b).await.unwrap();
        let a_id = store.register_artifact(pull, ARTIFACT_RAW_ZIP, &a).await.unwrap();

        assert!(matches!(
            store.register_artifact(pull, ARTIFACT_RAW_ZIP, &dir.path().join("gone")).await,
            Err(LedgerError::ArtifactMissing(_))
        ));

        assert_eq!(store.latest_run_id("pull").await.unwrap(), Some(pull));
        assert_eq!(store.latest_run_id("process").await.unwrap(), None);
        assert_eq!(
            store.artifact_ids_for_run(pull, ARTIFACT_RAW_ZIP).await.unwrap(),
            vec![a_id, b_id]
        );

        let process = store.start_run(NewRun::new("process")).await.unwrap();
        let table = store
            .register_db_artifact(process, ARTIFACT_DB_TABLE, DISPATCH_PRICE_TABLE)
            .await
            .unwrap();
        let db_artifact = store.artifacts().into_iter().find(|x| x.id == table).unwrap();
        assert_eq!(db_artifact.path, "db://public.dispatch_price");
        assert!(db_artifact.content_hash.is_none());

        let edge = LineageEdge::into_artifact(process, NODE_ARTIFACT, a_id, table);
        store.add_lineage(&edge).await.unwrap();
        store.add_lineage(&edge).await.unwrap();
        assert_eq!(store.edges().len(), 1);
    }
}
