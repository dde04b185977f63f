// Idempotent dispatch price storage

mod memory;
mod postgres;

pub use memory::InMemoryDispatchPriceRepository;
pub use postgres::PgDispatchPriceRepository;

use crate::error::Result;
use crate::models::{NaturalKey, NormalizedRow, UpsertStats};
use async_trait::async_trait;
use std::collections::HashMap;

/// Applies rows keyed by `(settlement_date, region_id, run_no, intervention)`.
///
/// Absent keys are inserted, keys whose `rrp` changed are updated, and
/// identical rows are left alone and counted as neither.
#[async_trait]
pub trait DispatchPriceRepository: Send + Sync {
    async fn apply(&self, rows: &[NormalizedRow]) -> Result<UpsertStats>;
}

/// Collapse rows sharing a natural key, keeping the last occurrence.
///
/// First-seen order of keys is preserved.
pub fn dedupe_by_key(rows: &[NormalizedRow]) -> Vec<NormalizedRow> {
    let mut positions: HashMap<NaturalKey, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<NormalizedRow> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.get(&row.key()) {
            Some(&idx) => unique[idx] = row.clone(),
            None => {
                positions.insert(row.key(), unique.len());
                unique.push(row.clone());
            },
        }
    }

    unique
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use nem_common::timestamp::parse_settlement;

    fn row(region: &str, rrp: f64) -> NormalizedRow {
        NormalizedRow {
            settlement_date: parse_settlement("2024/01/01 00:05:00").unwrap(),
            region_id: region.to_string(),
            rrp,
            intervention: 0,
            run_no: 1,
        }
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_first_seen_order() {
        let rows = vec![row("NSW1", 1.0), row("VIC1", 2.0), row("NSW1", 3.0)];
        let unique = dedupe_by_key(&rows);
        assert_eq!(unique, vec![row("NSW1", 3.0), row("VIC1", 2.0)]);
    }

    #[test]
    fn test_dedupe_collapses_settlement_spellings() {
        let iso = NormalizedRow {
            settlement_date: parse_settlement("2024-01-01 00:05:00").unwrap(),
            ..row("NSW1", 2.0)
        };
        let unique = dedupe_by_key(&[row("NSW1", 1.0), iso.clone()]);
        assert_eq!(unique, vec![iso]);
    }

    #[test]
    fn test_dedupe_empty() {
        assert!(dedupe_by_key(&[]).is_empty());
    }
}
