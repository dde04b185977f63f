//! Durable watermark stores
//!
//! A watermark is a named timestamp marking the newest object a pipeline stage
//! has fully handled. Stores accept both the compact `YYYYMMDDHHMM` and the
//! ISO spellings on read and always write the canonical ISO form.
//!
//! The stores themselves do not enforce monotonicity and take no lock. One
//! writer per watermark name is an operational requirement; use
//! [`advance_watermark`] so a run never moves a watermark backwards.

mod file;
mod memory;
mod postgres;

pub use file::FileWatermarkStore;
pub use memory::InMemoryWatermarkStore;
pub use postgres::PgWatermarkStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{info, warn};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<NaiveDateTime>>;

    async fn set(&self, name: &str, value: NaiveDateTime) -> Result<()>;
}

/// Decode a stored value; unreadable values are logged and treated as absent
pub(crate) fn decode_stored(name: &str, raw: &str) -> Option<NaiveDateTime> {
    match nem_common::timestamp::parse_flexible(raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(watermark = name, value = raw, "Ignoring unreadable watermark: {}", e);
            None
        },
    }
}

/// Move `name` to `candidate` only if that is strictly newer than what is stored.
///
/// Returns whether a write happened.
pub async fn advance_watermark(
    store: &dyn WatermarkStore,
    name: &str,
    candidate: NaiveDateTime,
) -> Result<bool> {
    let current = store.get(name).await?;
    if current.is_some_and(|stored| stored >= candidate) {
        return Ok(false);
    }

    store.set(name, candidate).await?;
    info!(
        watermark = name,
        value = %nem_common::timestamp::format_canonical(&candidate),
        "Watermark advanced"
    );
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_advance_never_regresses() {
        let store = InMemoryWatermarkStore::new();

        assert!(advance_watermark(&store, "wm", ts(0, 10)).await.unwrap());
        assert!(!advance_watermark(&store, "wm", ts(0, 5)).await.unwrap());
        assert!(!advance_watermark(&store, "wm", ts(0, 10)).await.unwrap());
        assert_eq!(store.get("wm").await.unwrap(), Some(ts(0, 10)));

        assert!(advance_watermark(&store, "wm", ts(0, 15)).await.unwrap());
        assert_eq!(store.get("wm").await.unwrap(), Some(ts(0, 15)));
    }

    #[test]
    fn test_decode_stored() {
        assert_eq!(decode_stored("wm", "202401010010"), Some(ts(0, 10)));
        assert_eq!(decode_stored("wm", "2024-01-01 00:10:00"), Some(ts(0, 10)));
        assert_eq!(decode_stored("wm", "garbage"), None);
    }
}
