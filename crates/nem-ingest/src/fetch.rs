// Remote object fetcher with atomic, validated, retried writes

use crate::archive::validate_archive;
use crate::config::HttpSettings;
use crate::error::{FetchError, Result};
use futures::StreamExt;
use reqwest::Client;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// How often and how patiently a download is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_FETCH_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(crate::config::DEFAULT_FETCH_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (1-based) failed: `base * 2^(attempt-1)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// A fetched object in the inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub path: PathBuf,
    /// False when the destination already existed
    pub downloaded: bool,
}

/// In-flight name for `dest`: the same file name with `.tmp` appended
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Downloads single objects into the local inbox
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(settings: &HttpSettings, retry: RetryPolicy) -> Result<Self> {
        Ok(Self::with_client(settings.build_client()?, retry))
    }

    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Fetch `url` to `dest`.
    ///
    /// An existing destination is treated as already fetched. Otherwise the
    /// body is streamed to `<dest>.tmp`, validated, and renamed into place;
    /// the final path never holds a partial or invalid object.
    pub async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<FetchedObject, FetchError> {
        if tokio::fs::try_exists(dest).await? {
            debug!("Already fetched: {}", dest.display());
            return Ok(FetchedObject {
                path: dest.to_path_buf(),
                downloaded: false,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path_for(dest);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!("Downloading ({}/{}): {}", attempt, max_attempts, url);

            match self.try_fetch(url, &tmp).await {
                Ok(size) => {
                    tokio::fs::rename(&tmp, dest).await?;
                    info!(bytes = size, "Saved {}", dest.display());
                    return Ok(FetchedObject {
                        path: dest.to_path_buf(),
                        downloaded: true,
                    });
                },
                Err(e) => {
                    remove_if_present(&tmp).await;
                    warn!("Download attempt {}/{} failed for {}: {}", attempt, max_attempts, url, e);

                    if attempt >= max_attempts {
                        return Err(e);
                    }

                    let delay = self.retry.delay_after(attempt);
                    info!("Retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    async fn try_fetch(&self, url: &str, tmp: &Path) -> std::result::Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(tmp).await?;
        let mut stream = response.bytes_stream();
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let tmp_owned = tmp.to_path_buf();
        let validation = tokio::task::spawn_blocking(move || validate_archive(&tmp_owned))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        validation.map_err(FetchError::Invalid)?;

        Ok(size)
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        let dest = Path::new("/inbox/PUBLIC_DISPATCHIS_202401010005_0000000401234567.zip");
        assert_eq!(
            temp_path_for(dest),
            PathBuf::from("/inbox/PUBLIC_DISPATCHIS_202401010005_0000000401234567.zip.tmp")
        );
    }

    #[tokio::test]
    async fn test_existing_destination_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("already.zip");
        std::fs::write(&dest, b"anything").unwrap();

        let fetcher = Fetcher::new(&HttpSettings::default(), RetryPolicy::default()).unwrap();
        // No server is listening here; the existing file means no request is made.
        let fetched = fetcher.fetch("http://127.0.0.1:9/already.zip", &dest).await.unwrap();
        assert!(!fetched.downloaded);
        assert_eq!(fetched.path, dest);
    }
}
