//! Shared fixtures for the pipeline integration tests
//!
//! Builds dispatch CSV payloads and archives in memory, serves them from a
//! wiremock listing, and wires a [`Pipeline`] to in-memory stores.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::{NaiveDate, NaiveDateTime};
use nem_ingest::config::RunOptions;
use nem_ingest::discovery::CatalogScanner;
use nem_ingest::fetch::{Fetcher, RetryPolicy};
use nem_ingest::ledger::{InMemoryLedgerStore, Ledger};
use nem_ingest::registry::InMemoryRawObjectRegistry;
use nem_ingest::storage::InMemoryDispatchPriceRepository;
use nem_ingest::watermark::{InMemoryWatermarkStore, WatermarkStore};
use nem_ingest::{Pipeline, ReportType};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const REPORT: ReportType = ReportType::DispatchIs;

pub fn ts(day: u32, hh: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hh, mi, 0)
        .unwrap()
}

/// `PUBLIC_DISPATCHIS_<ts>_<seq>.zip`
pub fn object_name(at: NaiveDateTime) -> String {
    REPORT.encode_name(&at, Some(at.and_utc().timestamp() as u64))
}

/// A DISPATCH PRICE section with one row per region at `interval`
pub fn price_csv(interval: NaiveDateTime, prices: &[(&str, f64)]) -> String {
    let stamp = interval.format("%Y/%m/%d %H:%M:%S");
    let mut csv = String::from(
        "C,NEMP.WORLD,DISPATCHIS,AEMO,PUBLIC,2024/01/01,00:00:05\n\
         I,DISPATCH,CASE_SOLUTION,1,SETTLEMENTDATE,RUNNO,INTERVENTION,CASESUBTYPE\n\
         D,DISPATCH,CASE_SOLUTION,1,\"2024/01/01 00:05:00\",1,0,\n\
         I,DISPATCH,PRICE,5,SETTLEMENTDATE,RUNNO,REGIONID,DISPATCHINTERVAL,INTERVENTION,RRP\n",
    );
    for (region, rrp) in prices {
        csv.push_str(&format!(
            "D,DISPATCH,PRICE,5,\"{}\",1,{},20240101001,0,{}\n",
            stamp, region, rrp
        ));
    }
    csv.push_str("C,\"END OF REPORT\",8\n");
    csv
}

/// Stored (uncompressed) archive holding `members`
pub fn zip_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Archive for one interval with prices for two regions
pub fn interval_zip(at: NaiveDateTime, nsw: f64) -> Vec<u8> {
    let name = format!("PUBLIC_DISPATCHIS_{}.CSV", at.format("%Y%m%d%H%M"));
    zip_bytes(&[(&name, &price_csv(at, &[("NSW1", nsw), ("VIC1", 50.0)]))])
}

pub fn listing_html(names: &[String]) -> String {
    let links: String = names
        .iter()
        .map(|n| format!("<a href=\"/REPORTS/CURRENT/DispatchIS_Reports/{0}\">{0}</a><br>\n", n))
        .collect();
    format!(
        "<html><body><pre><a href=\"/REPORTS/CURRENT/\">[To Parent Directory]</a><br>\n{}</pre></body></html>",
        links
    )
}

pub async fn mount_listing(server: &MockServer, names: &[String]) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/", REPORT.directory())))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(names)))
        .mount(server)
        .await;
}

pub async fn mount_object(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}", REPORT.directory(), name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}", REPORT.directory(), name)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
    }
}

/// Mock server, inbox and in-memory stores for one test
pub struct Harness {
    pub server: MockServer,
    pub inbox: TempDir,
    pub watermarks: Arc<InMemoryWatermarkStore>,
    pub prices: Arc<InMemoryDispatchPriceRepository>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub registry: Arc<InMemoryRawObjectRegistry>,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            inbox: TempDir::new().unwrap(),
            watermarks: Arc::new(InMemoryWatermarkStore::new()),
            prices: Arc::new(InMemoryDispatchPriceRepository::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            registry: Arc::new(InMemoryRawObjectRegistry::new()),
        }
    }

    /// Pipeline with a database and full metadata tracking
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_without_database()
            .with_repository(self.prices.clone())
            .with_ledger(Ledger::new(
                Some(self.ledger.clone()),
                Some(self.registry.clone()),
            ))
    }

    pub fn pipeline_without_database(&self) -> Pipeline {
        self.pipeline_on(self.watermarks.clone())
    }

    /// Full pipeline persisting watermarks to `watermarks` instead of the harness store
    pub fn pipeline_with_watermarks(&self, watermarks: Arc<dyn WatermarkStore>) -> Pipeline {
        self.pipeline_on(watermarks)
            .with_repository(self.prices.clone())
            .with_ledger(Ledger::new(
                Some(self.ledger.clone()),
                Some(self.registry.clone()),
            ))
    }

    fn pipeline_on(&self, watermarks: Arc<dyn WatermarkStore>) -> Pipeline {
        let client = reqwest::Client::new();
        Pipeline::new(
            self.server.uri(),
            CatalogScanner::with_client(client.clone()),
            Fetcher::with_client(client, fast_retry()),
            watermarks,
        )
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            report: REPORT,
            limit: 50,
            dry_run: false,
            since: None,
            backfill_days: None,
            update_watermark: true,
            raw_dir: self.inbox.path().to_path_buf(),
            cleanup: false,
        }
    }

    pub fn inbox_has(&self, name: &str) -> bool {
        self.inbox.path().join(name).exists()
    }

    pub fn inbox_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.inbox.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn write_inbox(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.inbox.path().join(name), bytes).unwrap();
    }
}
