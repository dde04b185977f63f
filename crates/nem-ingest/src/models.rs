// Data model shared by the dispatch-price pipelines

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A candidate object seen in a remote listing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObject {
    pub name: String,
    /// Timestamp embedded in the object name
    pub timestamp: NaiveDateTime,
}

/// Natural key of a dispatch price row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub settlement_date: NaiveDateTime,
    pub region_id: String,
    pub run_no: i32,
    pub intervention: i32,
}

/// One decoded dispatch price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    /// Settlement interval, market wall-clock time
    pub settlement_date: NaiveDateTime,
    pub region_id: String,
    pub rrp: f64,
    pub intervention: i32,
    pub run_no: i32,
}

impl NormalizedRow {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            settlement_date: self.settlement_date,
            region_id: self.region_id.clone(),
            run_no: self.run_no,
            intervention: self.intervention,
        }
    }
}

/// Outcome of applying a batch of rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertStats {
    pub fn merge(&mut self, other: UpsertStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }

    pub fn rows_written(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// A registered raw input object, identified by `(source_type, sha256)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObject {
    pub id: Uuid,
    pub source_type: String,
    pub path: String,
    pub filename: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub discovered_at: NaiveDateTime,
    pub run_id: Option<Uuid>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_natural_key_ignores_price() {
        let a = NormalizedRow {
            settlement_date: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 5, 0)
                .unwrap(),
            region_id: "NSW1".to_string(),
            rrp: 35.2,
            intervention: 0,
            run_no: 1,
        };
        let b = NormalizedRow { rrp: 99.0, ..a.clone() };
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = UpsertStats { inserted: 2, updated: 1 };
        total.merge(UpsertStats { inserted: 3, updated: 0 });
        assert_eq!(total, UpsertStats { inserted: 5, updated: 1 });
        assert_eq!(total.rows_written(), 6);
    }
}
