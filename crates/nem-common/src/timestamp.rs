//! Textual timestamp forms used by persisted watermarks and CLI overrides
//!
//! Two spellings exist in the wild: the compact `YYYYMMDDHHMM` taken straight
//! from remote object names, and ISO-8601 written by database-backed stores.
//! Both are accepted on read; only [`CANONICAL_FORMAT`] is ever written.

use crate::error::{NemError, Result};
use chrono::{DateTime, NaiveDateTime};

/// Compact form embedded in remote object names
pub const COMPACT_FORMAT: &str = "%Y%m%d%H%M";

/// The one format written back to storage
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a compact `YYYYMMDDHHMM` value, rejecting impossible calendar values
pub fn parse_compact(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    if value.len() != 12 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NemError::InvalidTimestamp(value.to_string()));
    }
    NaiveDateTime::parse_from_str(value, COMPACT_FORMAT)
        .map_err(|_| NemError::InvalidTimestamp(value.to_string()))
}

/// Parse any accepted watermark spelling
pub fn parse_flexible(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();

    if let Ok(ts) = parse_compact(value) {
        return Ok(ts);
    }

    for format in ISO_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }

    // Offsets are dropped: market time is stored as wall-clock time.
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.naive_local())
        .map_err(|_| NemError::InvalidTimestamp(value.to_string()))
}

/// Slash-separated forms used for interval cells in report files
const SETTLEMENT_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M"];

/// Parse a settlement interval cell from a report file
///
/// Report files write `2024/01/01 00:05:00`; the ISO forms are accepted as well.
pub fn parse_settlement(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    for format in SETTLEMENT_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }
    parse_flexible(value)
}

/// Render the canonical storage form
pub fn format_canonical(ts: &NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Render the compact form used in logs and object names
pub fn format_compact(ts: &NaiveDateTime) -> String {
    ts.format(COMPACT_FORMAT).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_compact() {
        assert_eq!(parse_compact("202402052110").unwrap(), ts(2024, 2, 5, 21, 10));
        assert!(parse_compact("202402302110").is_err());
        assert!(parse_compact("20240205211").is_err());
        assert!(parse_compact("2024020521100").is_err());
    }

    #[test]
    fn test_parse_flexible_accepts_both_encodings() {
        let expected = ts(2024, 2, 5, 21, 10);
        assert_eq!(parse_flexible("202402052110").unwrap(), expected);
        assert_eq!(parse_flexible("2024-02-05 21:10:00").unwrap(), expected);
        assert_eq!(parse_flexible("2024-02-05T21:10:00").unwrap(), expected);
        assert_eq!(parse_flexible("2024-02-05 21:10").unwrap(), expected);
        assert_eq!(parse_flexible(" 2024-02-05 21:10:00 ").unwrap(), expected);
        assert_eq!(parse_flexible("2024-02-05T21:10:00+10:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_flexible_rejects_garbage() {
        assert!(matches!(
            parse_flexible("yesterday"),
            Err(NemError::InvalidTimestamp(_))
        ));
        assert!(parse_flexible("").is_err());
    }

    #[test]
    fn test_parse_settlement_spellings_agree() {
        let expected = ts(2024, 1, 1, 0, 5);
        assert_eq!(parse_settlement("2024/01/01 00:05:00").unwrap(), expected);
        assert_eq!(parse_settlement("2024/01/01 00:05").unwrap(), expected);
        assert_eq!(parse_settlement("2024-01-01 00:05:00").unwrap(), expected);
        assert_eq!(parse_settlement("2024-01-01T00:05:00").unwrap(), expected);
        assert!(parse_settlement("not-a-date").is_err());
        assert!(parse_settlement("2024/02/30 00:05:00").is_err());
    }

    #[test]
    fn test_canonical_round_trip() {
        let value = ts(2023, 12, 31, 23, 55);
        assert_eq!(format_canonical(&value), "2023-12-31 23:55:00");
        assert_eq!(parse_flexible(&format_canonical(&value)).unwrap(), value);
        assert_eq!(format_compact(&value), "202312312355");
    }
}
