// Postgres dispatch price repository

use super::{dedupe_by_key, DispatchPriceRepository};
use crate::config::DEFAULT_UPSERT_BATCH_SIZE;
use crate::error::Result;
use crate::models::{NormalizedRow, UpsertStats};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

/// Writes to `dispatch_price` in bounded batches
///
/// Each batch is one statement and commits on its own. The statement reports
/// `xmax = 0` for freshly inserted tuples and returns nothing for conflicting
/// rows whose price is unchanged, which yields the inserted/updated split
/// without a separate read.
pub struct PgDispatchPriceRepository {
    db: PgPool,
    batch_size: usize,
}

impl PgDispatchPriceRepository {
    pub fn new(db: PgPool) -> Self {
        Self::with_batch_size(db, DEFAULT_UPSERT_BATCH_SIZE)
    }

    pub fn with_batch_size(db: PgPool, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
        }
    }

    async fn apply_batch(&self, rows: &[NormalizedRow]) -> Result<UpsertStats> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO dispatch_price (
                settlement_date,
                region_id,
                run_no,
                intervention,
                rrp
            )
            "#,
        );

        query_builder.push_values(rows, |mut b, row| {
            b.push_bind(row.settlement_date)
                .push_bind(&row.region_id)
                .push_bind(row.run_no)
                .push_bind(row.intervention)
                .push_bind(row.rrp);
        });

        query_builder.push(
            r#"
            ON CONFLICT (settlement_date, region_id, run_no, intervention)
            DO UPDATE SET
                rrp = EXCLUDED.rrp,
                ingested_at = now()
            WHERE dispatch_price.rrp IS DISTINCT FROM EXCLUDED.rrp
            RETURNING (xmax = 0) AS inserted
            "#,
        );

        let flags: Vec<bool> = query_builder
            .build_query_scalar::<bool>()
            .fetch_all(&self.db)
            .await?;

        let inserted = flags.iter().filter(|inserted| **inserted).count() as u64;
        Ok(UpsertStats {
            inserted,
            updated: flags.len() as u64 - inserted,
        })
    }
}

#[async_trait]
impl DispatchPriceRepository for PgDispatchPriceRepository {
    async fn apply(&self, rows: &[NormalizedRow]) -> Result<UpsertStats> {
        let unique = dedupe_by_key(rows);
        if unique.is_empty() {
            return Ok(UpsertStats::default());
        }

        let total_batches = unique.len().div_ceil(self.batch_size);
        let mut stats = UpsertStats::default();

        for (batch_idx, batch) in unique.chunks(self.batch_size).enumerate() {
            debug!(
                "Upserting dispatch_price batch {} / {} ({} rows)",
                batch_idx + 1,
                total_batches,
                batch.len()
            );
            stats.merge(self.apply_batch(batch).await?);
        }

        info!(
            rows = unique.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            "Applied dispatch prices"
        );

        Ok(stats)
    }
}
