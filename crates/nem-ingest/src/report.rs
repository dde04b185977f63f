//! Supported report types and the timestamp codec for their object names
//!
//! Object names follow `PUBLIC_<TYPE>_<yyyyMMddHHmm>[_<16-digit sequence>].zip`.
//! Decoding accepts any letter case; encoding always produces the canonical
//! upper-case form with a lower-case extension.

use crate::error::IngestError;
use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static DISPATCH_IS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^PUBLIC_DISPATCHIS_(\d{12})(?:_\d{16})?\.zip$")
        .unwrap_or_else(|e| panic!("invalid DispatchIS pattern: {}", e))
});

static DISPATCH_SCADA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^PUBLIC_DISPATCHSCADA_(\d{12})(?:_\d{16})?\.zip$")
        .unwrap_or_else(|e| panic!("invalid Dispatch SCADA pattern: {}", e))
});

/// Pipeline stage that owns a watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Archives landed in the inbox
    Pull,
    /// Archives applied to the database
    Processed,
}

/// Remote report family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReportType {
    #[default]
    DispatchIs,
    DispatchScada,
}

impl ReportType {
    pub const ALL: [ReportType; 2] = [ReportType::DispatchIs, ReportType::DispatchScada];

    /// Directory name under the current-reports root
    pub fn directory(&self) -> &'static str {
        match self {
            ReportType::DispatchIs => "DispatchIS_Reports",
            ReportType::DispatchScada => "Dispatch_SCADA",
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            ReportType::DispatchIs => "PUBLIC_DISPATCHIS_",
            ReportType::DispatchScada => "PUBLIC_DISPATCHSCADA_",
        }
    }

    pub fn pattern(&self) -> &'static Regex {
        match self {
            ReportType::DispatchIs => &DISPATCH_IS_PATTERN,
            ReportType::DispatchScada => &DISPATCH_SCADA_PATTERN,
        }
    }

    /// Listing URL for this report beneath `base`
    pub fn listing_url(&self, base: &str) -> String {
        format!("{}/{}/", base.trim_end_matches('/'), self.directory())
    }

    /// URL of a single object in this report's directory
    pub fn object_url(&self, base: &str, name: &str) -> String {
        format!("{}{}", self.listing_url(base), name)
    }

    /// Decode the embedded timestamp, or `None` when the name does not belong
    /// to this report or encodes an impossible date.
    pub fn parse_timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        let captures = self.pattern().captures(name.trim())?;
        let digits = captures.get(1)?.as_str();
        nem_common::timestamp::parse_compact(digits).ok()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.parse_timestamp(name).is_some()
    }

    /// Build an object name; `parse_timestamp(encode_name(ts, _)) == Some(ts)`
    /// for any minute-aligned timestamp with a four-digit year.
    pub fn encode_name(&self, ts: &NaiveDateTime, sequence: Option<u64>) -> String {
        let stamp = nem_common::timestamp::format_compact(ts);
        match sequence {
            Some(seq) => format!("{}{}_{:016}.zip", self.name_prefix(), stamp, seq),
            None => format!("{}{}.zip", self.name_prefix(), stamp),
        }
    }

    /// Watermark name for one stage of this report
    pub fn watermark_name(&self, stage: Stage) -> &'static str {
        match (self, stage) {
            (ReportType::DispatchIs, Stage::Pull) => "dispatch_price_zip_ts",
            (ReportType::DispatchIs, Stage::Processed) => "dispatch_price_processed_ts",
            (ReportType::DispatchScada, Stage::Pull) => "dispatch_scada_zip_ts",
            (ReportType::DispatchScada, Stage::Processed) => "dispatch_scada_processed_ts",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory())
    }
}

impl FromStr for ReportType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ReportType::ALL
            .into_iter()
            .find(|r| r.directory().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let valid: Vec<&str> = ReportType::ALL.iter().map(|r| r.directory()).collect();
                IngestError::Configuration(format!(
                    "Unknown report '{}'. Valid reports: {}",
                    wanted,
                    valid.join(", ")
                ))
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_timestamp_with_and_without_sequence() {
        let report = ReportType::DispatchIs;
        assert_eq!(
            report.parse_timestamp("PUBLIC_DISPATCHIS_202401010005_0000000401234567.zip"),
            Some(ts(2024, 1, 1, 0, 5))
        );
        assert_eq!(
            report.parse_timestamp("public_dispatchis_202401010005.ZIP"),
            Some(ts(2024, 1, 1, 0, 5))
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_invalid_calendar_values() {
        let report = ReportType::DispatchIs;
        assert_eq!(report.parse_timestamp("PUBLIC_DISPATCHIS_202402302110.zip"), None);
        assert_eq!(report.parse_timestamp("PUBLIC_DISPATCHIS_202401012460.zip"), None);
        assert_eq!(report.parse_timestamp("PUBLIC_DISPATCHIS_20240101000.zip"), None);
        assert_eq!(report.parse_timestamp("PUBLIC_DISPATCHIS_202401010005_123.zip"), None);
    }

    #[test]
    fn test_reports_do_not_cross_match() {
        let name = "PUBLIC_DISPATCHSCADA_202401010005_0000000401234567.zip";
        assert!(ReportType::DispatchScada.matches(name));
        assert!(!ReportType::DispatchIs.matches(name));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("dispatchis_reports".parse::<ReportType>().unwrap(), ReportType::DispatchIs);
        assert_eq!("Dispatch_SCADA".parse::<ReportType>().unwrap(), ReportType::DispatchScada);
        let err = "TradingIS_Reports".parse::<ReportType>().unwrap_err();
        assert!(matches!(err, IngestError::Configuration(ref m) if m.contains("DispatchIS_Reports")));
    }

    #[test]
    fn test_urls() {
        let base = "https://www.nemweb.com.au/REPORTS/CURRENT/";
        assert_eq!(
            ReportType::DispatchIs.listing_url(base),
            "https://www.nemweb.com.au/REPORTS/CURRENT/DispatchIS_Reports/"
        );
        assert_eq!(
            ReportType::DispatchScada.object_url("http://localhost:1234", "a.zip"),
            "http://localhost:1234/Dispatch_SCADA/a.zip"
        );
    }

    #[test]
    fn test_watermark_names() {
        assert_eq!(ReportType::DispatchIs.watermark_name(Stage::Pull), "dispatch_price_zip_ts");
        assert_eq!(
            ReportType::DispatchIs.watermark_name(Stage::Processed),
            "dispatch_price_processed_ts"
        );
    }

    proptest! {
        #[test]
        fn prop_encode_then_parse_is_identity(
            year in 1000i32..=9999,
            ordinal in 1u32..=365,
            hour in 0u32..24,
            minute in 0u32..60,
            sequence in proptest::option::of(0u64..=9_999_999_999_999_999),
            scada in any::<bool>(),
        ) {
            let date = NaiveDate::from_yo_opt(year, ordinal).unwrap();
            let value = date.and_hms_opt(hour, minute, 0).unwrap();
            let report = if scada { ReportType::DispatchScada } else { ReportType::DispatchIs };

            let name = report.encode_name(&value, sequence);
            prop_assert_eq!(report.parse_timestamp(&name), Some(value));
        }
    }
}
