//! Remote catalog scanning
//!
//! The report directories are plain HTML index pages. Candidate objects are
//! the `.zip` links on the page whose file name matches the report's naming
//! pattern.

use crate::config::HttpSettings;
use crate::error::{IngestError, Result};
use crate::models::RemoteObject;
use crate::report::ReportType;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").unwrap_or_else(|e| panic!("invalid link selector: {}", e))
});

/// Extract distinct `.zip` file names from anchor hrefs, in page order
pub fn extract_zip_names(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let path = href.split(['?', '#']).next().unwrap_or(href);
        let Some(name) = path.rsplit('/').next().map(str::trim) else {
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(".zip") {
            continue;
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }

    names
}

/// Keep names that belong to `report`, decoding their timestamps
pub fn match_report(report: ReportType, names: &[String]) -> Vec<RemoteObject> {
    names
        .iter()
        .filter_map(|name| {
            report.parse_timestamp(name).map(|timestamp| RemoteObject {
                name: name.clone(),
                timestamp,
            })
        })
        .collect()
}

/// Fetches and filters a report's directory listing
pub struct CatalogScanner {
    client: Client,
}

impl CatalogScanner {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self::with_client(settings.build_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// List candidate objects for `report` under `base_url`
    pub async fn scan(&self, report: ReportType, base_url: &str) -> Result<Vec<RemoteObject>> {
        let url = report.listing_url(base_url);
        debug!("Fetching directory listing from: {}", url);

        let html = self.fetch_listing(&url).await?;
        let names = extract_zip_names(&html);
        let objects = match_report(report, &names);

        info!(
            report = %report,
            links = names.len(),
            matching = objects.len(),
            "Scanned listing"
        );

        Ok(objects)
    }

    async fn fetch_listing(&self, url: &str) -> Result<String> {
        let listing_error = |message: String| IngestError::ListingFetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| listing_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(listing_error(format!("HTTP error: {}", response.status())));
        }

        response.text().await.map_err(|e| listing_error(e.to_string()))
    }
}
