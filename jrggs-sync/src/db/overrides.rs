//! Override persistence
//!
//! Overrides are stored as one JSON document per item key. A missing row
//! reads as an empty override.

use jrggs_common::time::now_millis;
use jrggs_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{decode, with_write_txn};
use crate::models::Override;

/// Current override for `key` (empty when none was ever written)
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Override> {
    let row = sqlx::query("SELECT document FROM overrides WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => decode("override", row.get::<&str, _>("document")),
        None => Ok(Override::empty(key)),
    }
}

async fn get_in(conn: &mut SqliteConnection, key: &str) -> Result<Override> {
    let row = sqlx::query("SELECT document FROM overrides WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => decode("override", row.get::<&str, _>("document")),
        None => Ok(Override::empty(key)),
    }
}

async fn put_in(conn: &mut SqliteConnection, ov: &Override) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO overrides (key, document, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&ov.key)
    .bind(serde_json::to_string(ov)?)
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Atomically read, modify and write the override for `key`
pub async fn modify<F>(pool: &SqlitePool, key: &str, edit: F) -> Result<Override>
where
    F: FnOnce(&mut Override) + Send + 'static,
{
    let key = key.to_string();
    with_write_txn(pool, move |conn| {
        Box::pin(async move { modify_in(conn, &key, edit).await })
    })
    .await
}

async fn modify_in<F>(conn: &mut SqliteConnection, key: &str, edit: F) -> Result<Override>
where
    F: FnOnce(&mut Override),
{
    let mut ov = get_in(conn, key).await?;
    edit(&mut ov);
    ov.key = key.to_string();
    put_in(conn, &ov).await?;
    Ok(ov)
}

/// Set `points` only if it still equals `expected`
///
/// Returns false, writing nothing, when the stored value has moved.
pub async fn compare_and_set_points(
    pool: &SqlitePool,
    key: &str,
    expected: Option<i64>,
    new_points: i64,
) -> Result<bool> {
    let key = key.to_string();
    with_write_txn(pool, move |conn| {
        Box::pin(async move { compare_and_set_points_in(conn, &key, expected, new_points).await })
    })
    .await
}

async fn compare_and_set_points_in(
    conn: &mut SqliteConnection,
    key: &str,
    expected: Option<i64>,
    new_points: i64,
) -> Result<bool> {
    let mut ov = get_in(conn, key).await?;
    if ov.points != expected {
        return Ok(false);
    }
    ov.points = Some(new_points);
    put_in(conn, &ov).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    #[tokio::test]
    async fn test_missing_override_reads_empty() {
        let store = Store::open_memory().await.unwrap();
        let ov = get(store.pool().unwrap(), "KEY-1").await.unwrap();
        assert_eq!(ov, Override::empty("KEY-1"));
    }

    #[tokio::test]
    async fn test_compare_and_set_points() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();

        assert!(compare_and_set_points(pool, "PR-1", None, 3).await.unwrap());
        assert!(!compare_and_set_points(pool, "PR-1", None, 5).await.unwrap());
        assert_eq!(get(pool, "PR-1").await.unwrap().points, Some(3));

        assert!(compare_and_set_points(pool, "PR-1", Some(3), 5).await.unwrap());
        assert_eq!(get(pool, "PR-1").await.unwrap().points, Some(5));
    }

    #[tokio::test]
    async fn test_modify_persists_edit() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();

        modify(pool, "KEY-1", |ov| {
            ov.invalidated_event_ids.insert("42".to_string());
        })
        .await
        .unwrap();

        let ov = get(pool, "KEY-1").await.unwrap();
        assert!(ov.is_invalidated("42"));
        assert_eq!(ov.key, "KEY-1");
    }
}
