//! Per-scope ingestion watermarks
//!
//! Stored in the shared `app_config` table under `watermark:{scope}`. The
//! write keeps the larger of the stored and new value, so a watermark never
//! moves backwards even if two passes race.

use jrggs_common::time::now_millis;
use jrggs_common::Result;
use sqlx::SqlitePool;

use crate::utils::retry_on_lock;

const WATERMARK_MAX_WAIT_MS: u64 = 5000;

fn watermark_key(scope: &str) -> String {
    format!("watermark:{}", scope)
}

/// Stored watermark for `scope`, if any pass has completed
pub async fn get(pool: &SqlitePool, scope: &str) -> Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_config WHERE key = ?")
        .bind(watermark_key(scope))
        .fetch_optional(pool)
        .await?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Advance the watermark; returns the value now stored
pub async fn advance(pool: &SqlitePool, scope: &str, value: i64) -> Result<i64> {
    let key = watermark_key(scope);
    retry_on_lock("advance watermark", WATERMARK_MAX_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO app_config (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(MAX(CAST(app_config.value AS INTEGER), CAST(excluded.value AS INTEGER)) AS TEXT),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key)
        .bind(value.to_string())
        .bind(now_millis())
        .execute(pool)
        .await?;
        Ok(())
    })
    .await?;

    Ok(get(pool, scope).await?.unwrap_or(value))
}
