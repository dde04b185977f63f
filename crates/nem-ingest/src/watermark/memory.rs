use super::{decode_stored, WatermarkStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local watermarks, stored as text like the durable backends
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw textual value, e.g. a legacy compact encoding
    pub fn with_raw(self, name: &str, raw: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(name.to_string(), raw.to_string());
        }
        self
    }

    pub fn raw(&self, name: &str) -> Option<String> {
        self.values.lock().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, name: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self.raw(name).and_then(|raw| decode_stored(name, &raw)))
    }

    async fn set(&self, name: &str, value: NaiveDateTime) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| crate::error::IngestError::Watermark("watermark map poisoned".to_string()))?;
        values.insert(name.to_string(), nem_common::timestamp::format_canonical(&value));
        Ok(())
    }
}
