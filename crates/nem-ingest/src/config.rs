// Process configuration for the dispatch-price pipelines

use crate::error::{IngestError, Result};
use crate::fetch::RetryPolicy;
use crate::report::ReportType;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.nemweb.com.au/REPORTS/CURRENT/";
pub const DEFAULT_RAW_DIR: &str = "data/raw/dispatch_inbox";
pub const DEFAULT_WATERMARK_FILE: &str = "data/raw/_ingestion_state/watermark.json";
pub const DEFAULT_USER_AGENT: &str = "nem-dispatch-pipeline/0.1 (+ingest)";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF_MS: u64 = 1500;
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_BACKFILL_DAYS: u32 = 36_500;

/// Where watermarks are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkBackend {
    Postgres,
    File,
}

impl FromStr for WatermarkBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "db" => Ok(WatermarkBackend::Postgres),
            "file" | "json" => Ok(WatermarkBackend::File),
            other => Err(IngestError::Configuration(format!(
                "Invalid WATERMARK_BACKEND '{}': expected postgres or file",
                other
            ))),
        }
    }
}

/// HTTP client settings shared by the scanner and the fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpSettings {
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| IngestError::Configuration(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Process-wide configuration, read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub base_url: String,
    pub raw_dir: PathBuf,
    pub default_report: String,
    pub watermark_backend: WatermarkBackend,
    pub watermark_file: PathBuf,
    pub http: HttpSettings,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub upsert_batch_size: usize,
    /// Track runs, artifacts and lineage when a database is available
    pub metadata_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            base_url: DEFAULT_BASE_URL.to_string(),
            raw_dir: PathBuf::from(DEFAULT_RAW_DIR),
            default_report: ReportType::default().directory().to_string(),
            watermark_backend: WatermarkBackend::File,
            watermark_file: PathBuf::from(DEFAULT_WATERMARK_FILE),
            http: HttpSettings::default(),
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            fetch_backoff_ms: DEFAULT_FETCH_BACKOFF_MS,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            metadata_enabled: true,
        }
    }
}

/// Parse an optional numeric variable, rejecting malformed values
fn parse_var<T: FromStr>(key: &str, get: &impl Fn(&str) -> Option<String>) -> Result<Option<T>> {
    get(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| {
                IngestError::Configuration(format!("Invalid {} '{}': expected a number", key, raw))
            })
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Call `dotenvy::dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL");
        let watermark_backend = match get("WATERMARK_BACKEND") {
            Some(value) => value.parse()?,
            None if database_url.is_some() => WatermarkBackend::Postgres,
            None => WatermarkBackend::File,
        };

        let config = Self {
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", &get)?.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            base_url: get("NEMWEB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            raw_dir: get("RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RAW_DIR)),
            default_report: get("AEMO_REPORT")
                .unwrap_or_else(|| ReportType::default().directory().to_string()),
            watermark_backend,
            watermark_file: get("WATERMARK_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WATERMARK_FILE)),
            http: HttpSettings {
                connect_timeout_secs: parse_var("HTTP_CONNECT_TIMEOUT_SECS", &get)?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                timeout_secs: parse_var("HTTP_TIMEOUT_SECS", &get)?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
                user_agent: get("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            },
            fetch_max_attempts: parse_var("FETCH_MAX_ATTEMPTS", &get)?.unwrap_or(DEFAULT_FETCH_MAX_ATTEMPTS),
            fetch_backoff_ms: parse_var("FETCH_BACKOFF_MS", &get)?.unwrap_or(DEFAULT_FETCH_BACKOFF_MS),
            upsert_batch_size: parse_var("UPSERT_BATCH_SIZE", &get)?.unwrap_or(DEFAULT_UPSERT_BATCH_SIZE),
            metadata_enabled: match get("METADATA_ENABLED") {
                Some(raw) => parse_bool(&raw).ok_or_else(|| {
                    IngestError::Configuration(format!(
                        "Invalid METADATA_ENABLED '{}': expected true or false",
                        raw
                    ))
                })?,
                None => true,
            },
            database_url,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(IngestError::Configuration("NEMWEB_BASE_URL cannot be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(IngestError::Configuration(format!(
                "NEMWEB_BASE_URL must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.http.timeout_secs == 0 || self.http.connect_timeout_secs == 0 {
            return Err(IngestError::Configuration("HTTP timeouts must be greater than 0".to_string()));
        }
        if self.fetch_max_attempts == 0 {
            return Err(IngestError::Configuration("FETCH_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.upsert_batch_size == 0 {
            return Err(IngestError::Configuration("UPSERT_BATCH_SIZE must be greater than 0".to_string()));
        }
        if self.database_max_connections == 0 {
            return Err(IngestError::Configuration(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }
        if self.watermark_backend == WatermarkBackend::Postgres && self.database_url.is_none() {
            return Err(IngestError::Configuration(
                "WATERMARK_BACKEND=postgres requires DATABASE_URL".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            base_delay: Duration::from_millis(self.fetch_backoff_ms),
        }
    }

    /// Database URL, required by commands that write rows
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            IngestError::Configuration("DATABASE_URL must be set for this command".to_string())
        })
    }
}

/// Per-run options after validation
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub report: ReportType,
    pub limit: usize,
    pub dry_run: bool,
    /// Explicit gate override
    pub since: Option<NaiveDateTime>,
    pub backfill_days: Option<u32>,
    pub update_watermark: bool,
    pub raw_dir: PathBuf,
    /// Delete processed inbox files after a successful run
    pub cleanup: bool,
}

impl RunOptions {
    /// Validate raw per-run values before any I/O happens
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        config: &IngestConfig,
        report: Option<&str>,
        limit: Option<usize>,
        dry_run: bool,
        since: Option<&str>,
        backfill_days: Option<u32>,
        no_update_watermark: bool,
        raw_dir: Option<PathBuf>,
        cleanup: bool,
    ) -> Result<Self> {
        let report: ReportType = report.unwrap_or(&config.default_report).parse()?;

        let since = since
            .map(|value| {
                nem_common::timestamp::parse_compact(value).map_err(|_| {
                    IngestError::Configuration(format!(
                        "Invalid --since '{}': expected YYYYMMDDHHMM",
                        value
                    ))
                })
            })
            .transpose()?;

        if let Some(days) = backfill_days.filter(|days| *days > MAX_BACKFILL_DAYS) {
            return Err(IngestError::Configuration(format!(
                "Invalid --backfill-days {}: at most {} days",
                days, MAX_BACKFILL_DAYS
            )));
        }

        Ok(Self {
            report,
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            dry_run,
            since,
            backfill_days,
            update_watermark: !no_update_watermark,
            raw_dir: raw_dir.unwrap_or_else(|| config.raw_dir.clone()),
            cleanup,
        })
    }

    /// Whether a successful run may move the watermark
    pub fn may_advance_watermark(&self) -> bool {
        !self.dry_run && self.update_watermark
    }
}
