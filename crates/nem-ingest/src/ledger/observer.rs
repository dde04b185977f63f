// Best-effort provenance boundary used by the pipelines

use super::{LedgerStore, LineageEdge, NewRun, RunMetrics, RunStatus};
use crate::registry::RawObjectRegistry;
use nem_common::checksum::ContentDigest;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Optional run/artifact/lineage/raw-object tracking.
///
/// Every method swallows failures after logging a warning, so a broken or
/// absent metadata store never changes what a pipeline ingests or returns.
#[derive(Clone, Default)]
pub struct Ledger {
    store: Option<Arc<dyn LedgerStore>>,
    registry: Option<Arc<dyn RawObjectRegistry>>,
}

impl Ledger {
    pub fn new(store: Option<Arc<dyn LedgerStore>>, registry: Option<Arc<dyn RawObjectRegistry>>) -> Self {
        Self { store, registry }
    }

    /// No tracking at all
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn start_run(&self, run: NewRun) -> Option<Uuid> {
        let store = self.store.as_ref()?;
        let command = run.command.clone();
        match store.start_run(run).await {
            Ok(id) => {
                debug!(command = %command, "Started run {}", id);
                Some(id)
            },
            Err(e) => {
                warn!("Metadata disabled for {} run: {}", command, e);
                None
            },
        }
    }

    pub async fn finish_run(
        &self,
        run_id: Option<Uuid>,
        status: RunStatus,
        metrics: &RunMetrics,
        error_message: Option<&str>,
    ) {
        let (Some(store), Some(run_id)) = (self.store.as_ref(), run_id) else {
            return;
        };
        if let Err(e) = store.finish_run(run_id, status, metrics, error_message).await {
            warn!("Could not finish run {}: {}", run_id, e);
        }
    }

    pub async fn register_artifact(&self, run_id: Option<Uuid>, artifact_type: &str, path: &Path) -> Option<Uuid> {
        let (store, run_id) = (self.store.as_ref()?, run_id?);
        store
            .register_artifact(run_id, artifact_type, path)
            .await
            .inspect_err(|e| warn!("Could not register artifact {}: {}", path.display(), e))
            .ok()
    }

    pub async fn register_db_artifact(&self, run_id: Option<Uuid>, artifact_type: &str, name: &str) -> Option<Uuid> {
        let (store, run_id) = (self.store.as_ref()?, run_id?);
        store
            .register_db_artifact(run_id, artifact_type, name)
            .await
            .inspect_err(|e| warn!("Could not register db artifact {}: {}", name, e))
            .ok()
    }

    /// Add `from_type` -> artifact edges for every id in `from_ids`
    pub async fn link(&self, run_id: Option<Uuid>, from_type: &str, from_ids: &[Uuid], artifact_id: Option<Uuid>) {
        let (Some(store), Some(run_id), Some(artifact_id)) = (self.store.as_ref(), run_id, artifact_id) else {
            return;
        };
        for from_id in from_ids {
            let edge = LineageEdge::into_artifact(run_id, from_type, *from_id, artifact_id);
            if let Err(e) = store.add_lineage(&edge).await {
                warn!("Could not record lineage {} -> {}: {}", from_id, artifact_id, e);
            }
        }
    }

    /// Artifacts of `artifact_type` from the latest run of `command`
    pub async fn upstream_artifacts(&self, command: &str, artifact_type: &str) -> Vec<Uuid> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        let run_id = match store.latest_run_id(command).await {
            Ok(Some(id)) => id,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Could not look up latest {} run: {}", command, e);
                return Vec::new();
            },
        };
        store
            .artifact_ids_for_run(run_id, artifact_type)
            .await
            .inspect_err(|e| warn!("Could not list artifacts of run {}: {}", run_id, e))
            .unwrap_or_default()
    }

    pub async fn register_raw_object(
        &self,
        source_type: &str,
        path: &Path,
        digest: &ContentDigest,
        run_id: Option<Uuid>,
    ) -> Option<Uuid> {
        let registry = self.registry.as_ref()?;
        registry
            .register_digest(source_type, path, digest, run_id)
            .await
            .inspect_err(|e| warn!("Could not register raw object {}: {}", path.display(), e))
            .ok()
    }

    /// Whether identical content was already registered; lookup failures read as "no"
    pub async fn raw_object_exists(&self, source_type: &str, sha256: &str) -> bool {
        let Some(registry) = self.registry.as_ref() else {
            return false;
        };
        registry
            .exists(source_type, sha256)
            .await
            .inspect_err(|e| warn!("Raw object lookup failed: {}", e))
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedgerStore, ARTIFACT_RAW_ZIP};

    #[tokio::test]
    async fn test_disabled_ledger_is_inert() {
        let ledger = Ledger::disabled();
        assert!(!ledger.is_enabled());
        assert_eq!(ledger.start_run(NewRun::new("pull")).await, None);
        ledger
            .finish_run(None, RunStatus::Success, &RunMetrics::default(), None)
            .await;
        assert!(ledger.upstream_artifacts("pull", ARTIFACT_RAW_ZIP).await.is_empty());
        assert!(!ledger.raw_object_exists("zip", "abc").await);
    }

    #[tokio::test]
    async fn test_failures_are_absorbed() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = Ledger::new(Some(store.clone()), None);
        let run = ledger.start_run(NewRun::new("pull")).await;
        assert!(run.is_some());

        // Missing artifact path and double finish are logged, not raised.
        assert_eq!(
            ledger
                .register_artifact(run, ARTIFACT_RAW_ZIP, Path::new("/definitely/missing.zip"))
                .await,
            None
        );
        ledger.finish_run(run, RunStatus::Success, &RunMetrics::default(), None).await;
        ledger.finish_run(run, RunStatus::Failed, &RunMetrics::default(), Some("x")).await;

        let stored = store.runs();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, RunStatus::Success);
    }
}
