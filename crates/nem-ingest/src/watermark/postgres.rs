// Postgres watermark backend (`watermark_state` table)

use super::{decode_stored, WatermarkStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;

pub struct PgWatermarkStore {
    db: PgPool,
}

impl PgWatermarkStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn get(&self, name: &str) -> Result<Option<NaiveDateTime>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM watermark_state WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.db)
                .await?;

        Ok(raw.and_then(|value| decode_stored(name, &value)))
    }

    async fn set(&self, name: &str, value: NaiveDateTime) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watermark_state (name, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(name)
        .bind(nem_common::timestamp::format_canonical(&value))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
