//! Raw-object registry
//!
//! Raw inputs are identified by `(source_type, sha256)`, never by name. The
//! same bytes registered again under another file name keep their original
//! identity; only the recorded location and discovery time move.

use crate::error::{IngestError, Result};
use crate::models::RawObject;
use async_trait::async_trait;
use chrono::Utc;
use nem_common::checksum::{self, ContentDigest};
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Source type of an archive landed by `pull`
pub const SOURCE_FETCHED_ZIP: &str = "fetched_zip";
/// Source type of an archive whose rows were applied
pub const SOURCE_ZIP: &str = "zip";
/// Source type of a loose CSV whose rows were applied
pub const SOURCE_CSV: &str = "csv";

/// Hash a file or directory off the async runtime
pub async fn digest_path(path: &Path) -> Result<ContentDigest> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || checksum::hash_path(&owned))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e.to_string())))?
        .map_err(IngestError::from)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
pub trait RawObjectRegistry: Send + Sync {
    /// Record `path` with an already computed digest; returns the stable id
    async fn register_digest(
        &self,
        source_type: &str,
        path: &Path,
        digest: &ContentDigest,
        run_id: Option<Uuid>,
    ) -> Result<Uuid>;

    async fn exists(&self, source_type: &str, sha256: &str) -> Result<bool>;

    /// Hash `path` and record it
    async fn register(&self, source_type: &str, path: &Path, run_id: Option<Uuid>) -> Result<Uuid> {
        if !path.exists() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Raw object not found: {}", path.display()),
            )));
        }
        let digest = digest_path(path).await?;
        self.register_digest(source_type, path, &digest, run_id).await
    }
}

pub struct PgRawObjectRegistry {
    db: PgPool,
}

impl PgRawObjectRegistry {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RawObject>> {
        let row: Option<(Uuid, String, String, String, i64, String, chrono::NaiveDateTime, Option<Uuid>)> =
            sqlx::query_as(
                r#"
                SELECT id, source_type, path, filename, size_bytes, sha256, discovered_at, run_id
                FROM raw_object
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(
            |(id, source_type, path, filename, size_bytes, sha256, discovered_at, run_id)| RawObject {
                id,
                source_type,
                path,
                filename,
                size_bytes,
                sha256,
                discovered_at,
                run_id,
            },
        ))
    }
}

#[async_trait]
impl RawObjectRegistry for PgRawObjectRegistry {
    async fn register_digest(
        &self,
        source_type: &str,
        path: &Path,
        digest: &ContentDigest,
        run_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let size_bytes = i64::try_from(digest.size_bytes).unwrap_or(i64::MAX);

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO raw_object (
                id,
                source_type,
                path,
                filename,
                size_bytes,
                sha256,
                discovered_at,
                run_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
            ON CONFLICT (source_type, sha256)
            DO UPDATE SET
                path = EXCLUDED.path,
                filename = EXCLUDED.filename,
                discovered_at = EXCLUDED.discovered_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_type)
        .bind(path.display().to_string())
        .bind(file_name_of(path))
        .bind(size_bytes)
        .bind(&digest.sha256)
        .bind(run_id)
        .fetch_one(&self.db)
        .await?;

        Ok(id)
    }

    async fn exists(&self, source_type: &str, sha256: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM raw_object WHERE source_type = $1 AND sha256 = $2)",
        )
        .bind(source_type)
        .bind(sha256)
        .fetch_one(&self.db)
        .await?;

        Ok(found)
    }
}

/// Registry kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRawObjectRegistry {
    objects: Mutex<HashMap<(String, String), RawObject>>,
}

impl InMemoryRawObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of registered objects, ordered by path
    pub fn objects(&self) -> Vec<RawObject> {
        let mut all: Vec<RawObject> = self
            .objects
            .lock()
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    fn poisoned() -> IngestError {
        IngestError::Storage("raw object map poisoned".to_string())
    }
}

#[async_trait]
impl RawObjectRegistry for InMemoryRawObjectRegistry {
    async fn register_digest(
        &self,
        source_type: &str,
        path: &Path,
        digest: &ContentDigest,
        run_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        let now = Utc::now().naive_utc();
        let location = PathBuf::from(path);

        let entry = objects
            .entry((source_type.to_string(), digest.sha256.clone()))
            .and_modify(|existing| {
                existing.path = location.display().to_string();
                existing.filename = file_name_of(&location);
                existing.discovered_at = now;
            })
            .or_insert_with(|| RawObject {
                id: Uuid::new_v4(),
                source_type: source_type.to_string(),
                path: location.display().to_string(),
                filename: file_name_of(&location),
                size_bytes: i64::try_from(digest.size_bytes).unwrap_or(i64::MAX),
                sha256: digest.sha256.clone(),
                discovered_at: now,
                run_id,
            });

        Ok(entry.id)
    }

    async fn exists(&self, source_type: &str, sha256: &str) -> Result<bool> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        Ok(objects.contains_key(&(source_type.to_string(), sha256.to_string())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn poison<T>(lock: &std::sync::Mutex<T>) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.lock().unwrap();
            panic!("poisoning lock for test");
        }));
    }

    #[tokio::test]
    async fn test_poisoned_map_is_a_storage_error() {
        let registry = InMemoryRawObjectRegistry::new();
        poison(&registry.objects);
        let result = registry.exists(SOURCE_ZIP, "00").await;
        assert!(matches!(result, Err(IngestError::Storage(_))));
    }

    #[tokio::test]
    async fn test_identical_bytes_share_identity() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.zip");
        let renamed = dir.path().join("renamed.zip");
        std::fs::write(&first, b"same bytes").unwrap();
        std::fs::write(&renamed, b"same bytes").unwrap();

        let registry = InMemoryRawObjectRegistry::new();
        let a = registry.register(SOURCE_ZIP, &first, None).await.unwrap();
        let b = registry.register(SOURCE_ZIP, &renamed, None).await.unwrap();

        assert_eq!(a, b);
        let objects = registry.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].filename, "renamed.zip");
    }

    #[tokio::test]
    async fn test_single_byte_difference_is_a_new_object() {
        let dir = TempDir::new().unwrap();
        let a_path = dir.path().join("a.zip");
        let b_path = dir.path().join("b.zip");
        std::fs::write(&a_path, b"bytes-1").unwrap();
        std::fs::write(&b_path, b"bytes-2").unwrap();

        let registry = InMemoryRawObjectRegistry::new();
        let a = registry.register(SOURCE_ZIP, &a_path, None).await.unwrap();
        let b = registry.register(SOURCE_ZIP, &b_path, None).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.objects().len(), 2);
    }

    #[tokio::test]
    async fn test_source_type_scopes_identity_and_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        std::fs::write(&path, b"payload").unwrap();

        let registry = InMemoryRawObjectRegistry::new();
        registry.register(SOURCE_FETCHED_ZIP, &path, None).await.unwrap();

        let digest = digest_path(&path).await.unwrap();
        assert!(registry.exists(SOURCE_FETCHED_ZIP, &digest.sha256).await.unwrap());
        assert!(!registry.exists(SOURCE_ZIP, &digest.sha256).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRawObjectRegistry::new();
        let result = registry.register(SOURCE_CSV, &dir.path().join("gone.csv"), None).await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
