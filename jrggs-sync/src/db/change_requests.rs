//! Change request persistence
//!
//! The partial unique index on `(target_key, request_type) WHERE status =
//! 'PENDING'` enforces at most one open request per target and type.
//! Status changes are conditional on the row still being PENDING.

use jrggs_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::decode;
use crate::models::{ChangeRequest, ChangeRequestStatus, ChangeRequestType};

const REQUEST_COLUMNS: &str = "id, request_type, target_key, data, description, justification, status, \
     requester_id, processed_by, processed_at, rejection_reason, created_at, updated_at";

fn row_to_request(row: &SqliteRow) -> Result<ChangeRequest> {
    let request_type: String = row.get("request_type");
    let status: String = row.get("status");

    Ok(ChangeRequest {
        id: row.get("id"),
        request_type: ChangeRequestType::parse(&request_type)
            .ok_or_else(|| Error::Internal(format!("Unknown request type: {}", request_type)))?,
        target_key: row.get("target_key"),
        data: decode("data", row.get::<&str, _>("data"))?,
        description: row.get("description"),
        justification: row.get("justification"),
        status: ChangeRequestStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown request status: {}", status)))?,
        requester_id: row.get("requester_id"),
        processed_by: row.get("processed_by"),
        processed_at: row.get("processed_at"),
        rejection_reason: row.get("rejection_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Insert a new request
///
/// Fails with a unique violation (see [`Error::is_unique_violation`]) when a
/// PENDING request of the same type already targets the same key.
pub async fn insert(pool: &SqlitePool, request: &ChangeRequest) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO change_requests (
            id, request_type, target_key, data, description, justification,
            status, requester_id, processed_by, processed_at, rejection_reason,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&request.id)
    .bind(request.request_type.as_str())
    .bind(&request.target_key)
    .bind(serde_json::to_string(&request.data)?)
    .bind(&request.description)
    .bind(&request.justification)
    .bind(request.status.as_str())
    .bind(&request.requester_id)
    .bind(&request.processed_by)
    .bind(request.processed_at)
    .bind(&request.rejection_reason)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<ChangeRequest>> {
    let sql = format!("SELECT {} FROM change_requests WHERE id = ?", REQUEST_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(row_to_request).transpose()
}

/// The open request of `request_type` against `target_key`, if any
pub async fn find_pending(
    pool: &SqlitePool,
    target_key: &str,
    request_type: ChangeRequestType,
) -> Result<Option<ChangeRequest>> {
    let sql = format!(
        "SELECT {} FROM change_requests WHERE target_key = ? AND request_type = ? AND status = 'PENDING'",
        REQUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(target_key)
        .bind(request_type.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_request).transpose()
}

/// Requests with `status`, newest first
pub async fn list_by_status(
    pool: &SqlitePool,
    status: ChangeRequestStatus,
) -> Result<Vec<ChangeRequest>> {
    let sql = format!(
        "SELECT {} FROM change_requests WHERE status = ? ORDER BY created_at DESC, id",
        REQUEST_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_request).collect()
}

/// Move a PENDING request to a terminal status
///
/// Returns false when the request was no longer PENDING.
pub async fn resolve(
    pool: &SqlitePool,
    id: &str,
    status: ChangeRequestStatus,
    processed_by: &str,
    rejection_reason: Option<&str>,
    at: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE change_requests SET
            status = ?,
            processed_by = ?,
            processed_at = ?,
            rejection_reason = ?,
            updated_at = ?
        WHERE id = ? AND status = 'PENDING'
        "#,
    )
    .bind(status.as_str())
    .bind(processed_by)
    .bind(at)
    .bind(rejection_reason)
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
