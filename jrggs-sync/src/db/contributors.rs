//! Contributor roles used to classify review events

use jrggs_common::time::now_millis;
use jrggs_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: String,
    pub display_name: Option<String>,
    pub role: String,
}

/// Insert or update a contributor
///
/// `updated_at` always exceeds every stored value so the freshness token
/// moves on each write.
pub async fn upsert(pool: &SqlitePool, contributor: &Contributor) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contributors (id, display_name, role, updated_at)
        VALUES (?, ?, ?, MAX(?, (SELECT COALESCE(MAX(updated_at), 0) + 1 FROM contributors)))
        ON CONFLICT(id) DO UPDATE SET
            display_name = excluded.display_name,
            role = excluded.role,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&contributor.id)
    .bind(&contributor.display_name)
    .bind(&contributor.role)
    .bind(now_millis())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<Contributor>> {
    let rows = sqlx::query("SELECT id, display_name, role FROM contributors ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| Contributor {
            id: row.get("id"),
            display_name: row.get("display_name"),
            role: row.get("role"),
        })
        .collect())
}

/// Freshness token: changes whenever any contributor row is written
pub async fn freshness_token(pool: &SqlitePool) -> Result<(i64, i64)> {
    let row = sqlx::query("SELECT COALESCE(MAX(updated_at), 0) AS latest, COUNT(*) AS total FROM contributors")
        .fetch_one(pool)
        .await?;
    Ok((row.get("latest"), row.get("total")))
}
