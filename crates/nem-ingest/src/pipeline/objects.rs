// Applying one local object (archive or loose CSV) to the price table

use super::Pipeline;
use crate::archive::{extract_csv_members, validate_archive};
use crate::error::{IngestError, Result};
use crate::ledger::RunMetrics;
use crate::models::UpsertStats;
use crate::registry::{digest_path, SOURCE_CSV, SOURCE_ZIP};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectKind {
    Zip,
    Csv,
}

impl ObjectKind {
    pub(crate) fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(ObjectKind::Zip),
            "csv" => Some(ObjectKind::Csv),
            _ => None,
        }
    }

    pub(crate) fn source_type(&self) -> &'static str {
        match self {
            ObjectKind::Zip => SOURCE_ZIP,
            ObjectKind::Csv => SOURCE_CSV,
        }
    }
}

/// Result of applying one object
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AppliedObject {
    /// Identical content was applied before; nothing was parsed
    pub duplicate: bool,
    pub raw_object_id: Option<Uuid>,
    pub rows_parsed: u64,
    pub invalid: u64,
    pub stats: UpsertStats,
}

impl AppliedObject {
    pub(crate) fn record(&self, metrics: &mut RunMetrics) {
        metrics.files += 1;
        metrics.rows_parsed += self.rows_parsed;
        metrics.invalid += self.invalid;
        metrics.inserted += self.stats.inserted;
        metrics.updated += self.stats.updated;
    }
}

/// Errors that end the whole run rather than just the current object
pub(crate) fn is_fatal(error: &IngestError) -> bool {
    matches!(
        error,
        IngestError::Persistence(_)
            | IngestError::Storage(_)
            | IngestError::Interrupted
            | IngestError::Configuration(_)
    )
}

async fn read_members(path: &Path, kind: ObjectKind) -> Result<Vec<(String, Vec<u8>)>> {
    match kind {
        ObjectKind::Zip => {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                validate_archive(&owned)?;
                extract_csv_members(&owned)
            })
                .await
                .map_err(|e| IngestError::Io(std::io::Error::other(e.to_string())))?
        },
        ObjectKind::Csv => {
            let bytes = tokio::fs::read(path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(vec![(name, bytes)])
        },
    }
}

impl Pipeline {
    /// Parse and upsert one local object, skipping content applied before.
    ///
    /// The raw object is registered only after its rows were written, so a
    /// failed object is retried on the next run.
    pub(crate) async fn apply_object(
        &self,
        path: &Path,
        kind: ObjectKind,
        run_id: Option<Uuid>,
    ) -> Result<AppliedObject> {
        let repository = self.repository()?;
        let digest = digest_path(path).await?;
        let source_type = kind.source_type();

        if self.ledger.raw_object_exists(source_type, &digest.sha256).await {
            info!("Skipping {} (already ingested by sha256)", path.display());
            return Ok(AppliedObject {
                duplicate: true,
                ..AppliedObject::default()
            });
        }

        let members = read_members(path, kind).await?;
        if members.is_empty() {
            info!("No CSV members in {}", path.display());
        }

        let mut applied = AppliedObject::default();
        for (name, bytes) in &members {
            let outcome = self.parser.parse_bytes(bytes)?;
            debug!(
                member = %name,
                rows = outcome.rows.len(),
                invalid = outcome.invalid,
                skipped = outcome.skipped,
                "Parsed member"
            );

            applied.rows_parsed += outcome.rows.len() as u64;
            applied.invalid += outcome.invalid;
            if !outcome.rows.is_empty() {
                applied.stats.merge(repository.apply(&outcome.rows).await?);
            }
        }

        applied.raw_object_id = self
            .ledger
            .register_raw_object(source_type, path, &digest, run_id)
            .await;

        info!(
            file = %path.display(),
            parsed = applied.rows_parsed,
            inserted = applied.stats.inserted,
            updated = applied.stats.updated,
            invalid = applied.invalid,
            "Applied object"
        );

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_kind_from_extension() {
        assert_eq!(ObjectKind::of(Path::new("a/B.ZIP")), Some(ObjectKind::Zip));
        assert_eq!(ObjectKind::of(Path::new("price.Csv")), Some(ObjectKind::Csv));
        assert_eq!(ObjectKind::of(Path::new("x.zip.tmp")), None);
        assert_eq!(ObjectKind::of(Path::new("README")), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal(&IngestError::Persistence(sqlx::Error::PoolTimedOut)));
        assert!(is_fatal(&IngestError::Interrupted));
        assert!(is_fatal(&IngestError::Storage("price map poisoned".into())));
        assert!(!is_fatal(&IngestError::Io(std::io::Error::other("bad member"))));
    }

    #[test]
    fn test_record_accumulates_metrics() {
        let applied = AppliedObject {
            rows_parsed: 5,
            invalid: 1,
            stats: UpsertStats { inserted: 3, updated: 1 },
            ..AppliedObject::default()
        };
        let mut metrics = RunMetrics::default();
        applied.record(&mut metrics);
        applied.record(&mut metrics);
        assert_eq!(metrics.files, 2);
        assert_eq!(metrics.rows_appended(), 8);
        assert_eq!(metrics.invalid, 2);
    }
}
