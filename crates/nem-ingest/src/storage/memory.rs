use super::{dedupe_by_key, DispatchPriceRepository};
use crate::error::{IngestError, Result};
use crate::models::{NaturalKey, NormalizedRow, UpsertStats};
use async_trait::async_trait;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Dispatch prices held in a map
#[derive(Debug, Default)]
pub struct InMemoryDispatchPriceRepository {
    rows: Mutex<BTreeMap<NaturalKey, f64>>,
    fail_next: Mutex<bool>,
}

impl InMemoryDispatchPriceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rrp(&self, key: &NaturalKey) -> Option<f64> {
        self.rows.lock().ok()?.get(key).copied()
    }

    /// Make the next `apply` fail without writing, to exercise error paths
    pub fn fail_next_apply(&self) {
        if let Ok(mut flag) = self.fail_next.lock() {
            *flag = true;
        }
    }
}

#[async_trait]
impl DispatchPriceRepository for InMemoryDispatchPriceRepository {
    async fn apply(&self, rows: &[NormalizedRow]) -> Result<UpsertStats> {
        if let Ok(mut flag) = self.fail_next.lock() {
            if std::mem::take(&mut *flag) {
                return Err(IngestError::Persistence(sqlx::Error::PoolClosed));
            }
        }

        let mut stored = self
            .rows
            .lock()
            .map_err(|_| IngestError::Storage("price map poisoned".to_string()))?;
        let mut stats = UpsertStats::default();

        for row in dedupe_by_key(rows) {
            match stored.entry(row.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(row.rrp);
                    stats.inserted += 1;
                },
                Entry::Occupied(mut slot) => {
                    if slot.get().to_bits() != row.rrp.to_bits() {
                        slot.insert(row.rrp);
                        stats.updated += 1;
                    }
                },
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use nem_common::timestamp::parse_settlement;

    fn rows(prices: &[(&str, f64)]) -> Vec<NormalizedRow> {
        prices
            .iter()
            .map(|(region, rrp)| NormalizedRow {
                settlement_date: parse_settlement("2024/01/01 00:05:00").unwrap(),
                region_id: region.to_string(),
                rrp: *rrp,
                intervention: 0,
                run_no: 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_replay_update() {
        let repo = InMemoryDispatchPriceRepository::new();
        let batch = rows(&[("NSW1", 35.2), ("QLD1", 40.0), ("VIC1", 12.5)]);

        let first = repo.apply(&batch).await.unwrap();
        assert_eq!(first, UpsertStats { inserted: 3, updated: 0 });

        let replay = repo.apply(&batch).await.unwrap();
        assert_eq!(replay, UpsertStats::default());

        let changed = repo.apply(&rows(&[("NSW1", 99.9)])).await.unwrap();
        assert_eq!(changed, UpsertStats { inserted: 0, updated: 1 });
        assert_eq!(repo.rrp(&rows(&[("NSW1", 0.0)])[0].key()), Some(99.9));
        assert_eq!(repo.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_keys_in_one_batch() {
        let repo = InMemoryDispatchPriceRepository::new();
        let stats = repo.apply(&rows(&[("NSW1", 1.0), ("NSW1", 2.0)])).await.unwrap();
        assert_eq!(stats, UpsertStats { inserted: 1, updated: 0 });
        assert_eq!(repo.rrp(&rows(&[("NSW1", 0.0)])[0].key()), Some(2.0));
    }

    #[tokio::test]
    async fn test_both_settlement_spellings_are_one_row() {
        let repo = InMemoryDispatchPriceRepository::new();
        let mut batch = rows(&[("NSW1", 1.0), ("NSW1", 2.0)]);
        batch[1].settlement_date = parse_settlement("2024-01-01 00:05:00").unwrap();

        let stats = repo.apply(&batch).await.unwrap();
        assert_eq!(stats, UpsertStats { inserted: 1, updated: 0 });
        assert_eq!(repo.len(), 1);
    }

    fn poison<T>(lock: &std::sync::Mutex<T>) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.lock().unwrap();
            panic!("poisoning lock for test");
        }));
    }

    #[tokio::test]
    async fn test_poisoned_map_is_a_storage_error() {
        let repo = InMemoryDispatchPriceRepository::new();
        poison(&repo.rows);
        let result = repo.apply(&rows(&[("SA1", 1.0)])).await;
        assert!(matches!(result, Err(IngestError::Storage(_))));
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let repo = InMemoryDispatchPriceRepository::new();
        repo.fail_next_apply();
        assert!(repo.apply(&rows(&[("SA1", 1.0)])).await.is_err());
        assert!(repo.is_empty());
        assert!(repo.apply(&rows(&[("SA1", 1.0)])).await.is_ok());
    }
}
