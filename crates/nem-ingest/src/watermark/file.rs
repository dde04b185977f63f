// JSON-file watermark backend

use super::{decode_stored, WatermarkStore};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Watermarks kept in one JSON object (`{"name": "YYYY-MM-DD HH:MM:SS"}`)
///
/// Writes go to a sibling temp file that is renamed over the original.
pub struct FileWatermarkStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let values: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| IngestError::Watermark(format!("{}: {}", self.path.display(), e)))?;

        // Older state files may hold compact numbers rather than strings.
        Ok(values
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(s) => Some((name, s)),
                serde_json::Value::Number(n) => Some((name, n.to_string())),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, name: &str) -> Result<Option<NaiveDateTime>> {
        let values = self.load().await?;
        Ok(values.get(name).and_then(|raw| decode_stored(name, raw)))
    }

    async fn set(&self, name: &str, value: NaiveDateTime) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut values = self.load().await?;
        values.insert(name.to_string(), nem_common::timestamp::format_canonical(&value));

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&values)
            .map_err(|e| IngestError::Watermark(e.to_string()))?;
        let tmp = crate::fetch::temp_path_for(&self.path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Wrote watermark {} to {}", name, self.path.display());
        Ok(())
    }
}
