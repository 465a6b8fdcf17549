//! Work item persistence
//!
//! Every external marking goes through [`mark_pending`] or one of the
//! helpers built on it, which set PENDING and bump `revision`. The queue
//! commits a batch with [`apply_updates`], which only moves an item's status
//! to SUCCESS/FAILED when the revision it loaded is still current.

use jrggs_common::time::now_millis;
use jrggs_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use super::{decode, with_write_txn};
use crate::models::{
    Comment, DerivedFields, HistoryEvent, ItemKind, ItemLinks, SyncParams, SyncStatus, WorkItem,
};
use crate::source::SourceItem;
use crate::utils::retry_on_lock;

const ITEM_COLUMNS: &str = "id, key, kind, scope, raw, snapshot, history, comments, \
     sync_status, sync_params, derived, links, pending_requests, revision, last_sync_at";

/// Lock wait for ingestion upserts
const UPSERT_MAX_WAIT_MS: u64 = 5000;

/// Result of one processing pass for one item
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub key: String,
    /// Revision the item had when it was loaded for processing
    pub revision: i64,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Processed {
        new_events: Vec<HistoryEvent>,
        new_comments: Vec<Comment>,
        derived: DerivedFields,
        links: Option<ItemLinks>,
    },
    Failed {
        reason: String,
    },
}

/// What [`apply_update`] ended up writing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Status moved to SUCCESS or FAILED
    Committed(SyncStatus),
    /// Inputs changed while processing; history merged, item left PENDING
    Deferred,
    /// Item no longer exists
    Missing,
}

/// Filter for [`list`]
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kind: Option<ItemKind>,
    pub status: Option<SyncStatus>,
    pub scope: Option<String>,
}

fn row_to_item(row: &SqliteRow) -> Result<WorkItem> {
    let kind: String = row.get("kind");
    let kind = ItemKind::parse(&kind)
        .ok_or_else(|| Error::Internal(format!("Unknown item kind: {}", kind)))?;
    let status: String = row.get("sync_status");
    let sync_status = SyncStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown sync status: {}", status)))?;

    Ok(WorkItem {
        id: row.get("id"),
        key: row.get("key"),
        kind,
        scope: row.get("scope"),
        raw: decode("raw", row.get::<&str, _>("raw"))?,
        snapshot: decode("snapshot", row.get::<&str, _>("snapshot"))?,
        history: decode("history", row.get::<&str, _>("history"))?,
        comments: decode("comments", row.get::<&str, _>("comments"))?,
        sync_status,
        sync_params: decode("sync_params", row.get::<&str, _>("sync_params"))?,
        derived: decode("derived", row.get::<&str, _>("derived"))?,
        links: decode("links", row.get::<&str, _>("links"))?,
        pending_requests: decode("pending_requests", row.get::<&str, _>("pending_requests"))?,
        revision: row.get("revision"),
        last_sync_at: row.get("last_sync_at"),
    })
}

/// Upsert fetched source items by key
///
/// New rows get empty history, derived fields and links. Existing rows get
/// the new raw payload and snapshot, are reset to PENDING for a full pass,
/// and have their revision bumped. Derived data is never touched here.
pub async fn upsert_from_source(
    pool: &SqlitePool,
    scope: &str,
    kind: ItemKind,
    items: &[SourceItem],
) -> Result<usize> {
    // Prepare all documents before touching the database
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        rows.push((
            item.key.clone(),
            serde_json::to_string(&item.raw)?,
            serde_json::to_string(&item.snapshot)?,
            item.snapshot.parent_key.clone(),
        ));
    }
    let params = serde_json::to_string(&SyncParams::full())?;
    let now = now_millis();

    retry_on_lock("upsert work items", UPSERT_MAX_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        for (key, raw, snapshot, parent_key) in &rows {
            sqlx::query(
                r#"
                INSERT INTO work_items (
                    key, kind, scope, raw, snapshot, parent_key,
                    sync_status, sync_params, revision, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, 'PENDING', ?, 1, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    raw = excluded.raw,
                    snapshot = excluded.snapshot,
                    parent_key = excluded.parent_key,
                    sync_status = 'PENDING',
                    sync_params = excluded.sync_params,
                    revision = work_items.revision + 1,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(kind.as_str())
            .bind(scope)
            .bind(raw)
            .bind(snapshot)
            .bind(parent_key)
            .bind(&params)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    })
    .await
}

/// Load one item by key
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<WorkItem>> {
    let sql = format!("SELECT {} FROM work_items WHERE key = ?", ITEM_COLUMNS);
    let row = sqlx::query(&sql).bind(key).fetch_optional(pool).await?;
    row.as_ref().map(row_to_item).transpose()
}

/// Up to `limit` PENDING items of one kind, oldest-inserted first
pub async fn claim_pending(pool: &SqlitePool, kind: ItemKind, limit: usize) -> Result<Vec<WorkItem>> {
    let sql = format!(
        "SELECT {} FROM work_items WHERE kind = ? AND sync_status = 'PENDING' ORDER BY id ASC LIMIT ?",
        ITEM_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_item).collect()
}

/// Items whose parent link equals `parent_key`
pub async fn find_children(pool: &SqlitePool, parent_key: &str) -> Result<Vec<WorkItem>> {
    let sql = format!(
        "SELECT {} FROM work_items WHERE parent_key = ? ORDER BY id ASC",
        ITEM_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(parent_key).fetch_all(pool).await?;
    rows.iter().map(row_to_item).collect()
}

/// Items matching `filter`, in insertion order
pub async fn list(pool: &SqlitePool, filter: &ItemFilter) -> Result<Vec<WorkItem>> {
    let sql = format!(
        "SELECT {} FROM work_items \
         WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR sync_status = ?2) AND (?3 IS NULL OR scope = ?3) \
         ORDER BY id ASC",
        ITEM_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.scope.as_deref())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_item).collect()
}

/// Set PENDING inside an open write transaction
///
/// Hints are combined with those of an earlier marking that has not been
/// processed yet. Returns the item kind, or `None` if the key is unknown.
async fn mark_pending_in(
    conn: &mut SqliteConnection,
    key: &str,
    params: SyncParams,
) -> Result<Option<ItemKind>> {
    let row = sqlx::query("SELECT kind, sync_status, sync_params FROM work_items WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let kind: String = row.get("kind");
    let kind = ItemKind::parse(&kind)
        .ok_or_else(|| Error::Internal(format!("Unknown item kind: {}", kind)))?;
    let status: String = row.get("sync_status");
    let params = if status == SyncStatus::Pending.as_str() {
        let pending: SyncParams = decode("sync_params", row.get::<&str, _>("sync_params"))?;
        params.combine(pending)
    } else {
        params
    };

    sqlx::query(
        "UPDATE work_items SET sync_status = 'PENDING', sync_params = ?, \
         revision = revision + 1, updated_at = ? WHERE key = ?",
    )
    .bind(serde_json::to_string(&params)?)
    .bind(now_millis())
    .bind(key)
    .execute(&mut *conn)
    .await?;

    Ok(Some(kind))
}

/// Reset one item to PENDING with the given hints
pub async fn mark_pending(
    pool: &SqlitePool,
    key: &str,
    params: SyncParams,
) -> Result<Option<ItemKind>> {
    let key = key.to_string();
    with_write_txn(pool, move |conn| {
        Box::pin(async move { mark_pending_in(conn, &key, params).await })
    })
    .await
}

/// Reset every item of a scope to PENDING
pub async fn mark_scope_pending(pool: &SqlitePool, scope: &str, params: SyncParams) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE work_items SET sync_status = 'PENDING', sync_params = ?, \
         revision = revision + 1, updated_at = ? WHERE scope = ?",
    )
    .bind(serde_json::to_string(&params)?)
    .bind(now_millis())
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Append events not already present, keyed by event id
fn merge_history(stored: &mut Vec<HistoryEvent>, new_events: &[HistoryEvent]) -> usize {
    let mut seen: HashSet<String> = stored.iter().map(|e| e.id.clone()).collect();
    let before = stored.len();
    for event in new_events {
        if seen.insert(event.id.clone()) {
            stored.push(event.clone());
        }
    }
    stored.len() - before
}

fn merge_comments(stored: &mut Vec<Comment>, new_comments: &[Comment]) -> usize {
    let mut seen: HashSet<String> = stored.iter().map(|c| c.id.clone()).collect();
    let before = stored.len();
    for comment in new_comments {
        if seen.insert(comment.id.clone()) {
            stored.push(comment.clone());
        }
    }
    stored.len() - before
}

/// Merge `new_events` into a history the same way [`apply_update`] does
pub fn merged_history(stored: &[HistoryEvent], new_events: &[HistoryEvent]) -> Vec<HistoryEvent> {
    let mut merged = stored.to_vec();
    merge_history(&mut merged, new_events);
    merged
}

/// Merge `new_comments` into stored comments the same way [`apply_update`] does
pub fn merged_comments(stored: &[Comment], new_comments: &[Comment]) -> Vec<Comment> {
    let mut merged = stored.to_vec();
    merge_comments(&mut merged, new_comments);
    merged
}

/// Commit one processing result atomically
pub async fn apply_update(pool: &SqlitePool, update: ItemUpdate) -> Result<ApplyOutcome> {
    with_write_txn(pool, move |conn| {
        Box::pin(async move { apply_update_in(conn, update).await })
    })
    .await
}

/// Commit a batch of processing results in one write transaction
///
/// Each update is still conditional on its own document's revision, and a
/// failure of one update does not discard the others. The outer error is
/// for the transaction itself.
pub async fn apply_updates(
    pool: &SqlitePool,
    updates: Vec<ItemUpdate>,
) -> Result<Vec<Result<ApplyOutcome>>> {
    if updates.is_empty() {
        return Ok(Vec::new());
    }
    with_write_txn(pool, move |conn| {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(updates.len());
            for update in updates {
                outcomes.push(apply_update_in(&mut *conn, update).await);
            }
            Ok(outcomes)
        })
    })
    .await
}

async fn apply_update_in(conn: &mut SqliteConnection, update: ItemUpdate) -> Result<ApplyOutcome> {
    let row = sqlx::query("SELECT history, comments, revision FROM work_items WHERE key = ?")
        .bind(&update.key)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(ApplyOutcome::Missing);
    };

    let current_revision: i64 = row.get("revision");
    let now = now_millis();

    match update.outcome {
        ItemOutcome::Processed {
            new_events,
            new_comments,
            derived,
            links,
        } => {
            let mut history: Vec<HistoryEvent> = decode("history", row.get::<&str, _>("history"))?;
            let mut comments: Vec<Comment> = decode("comments", row.get::<&str, _>("comments"))?;
            let appended = merge_history(&mut history, &new_events);
            merge_comments(&mut comments, &new_comments);
            let history = serde_json::to_string(&history)?;
            let comments = serde_json::to_string(&comments)?;

            if current_revision != update.revision {
                sqlx::query(
                    "UPDATE work_items SET history = ?, comments = ?, updated_at = ? WHERE key = ?",
                )
                .bind(&history)
                .bind(&comments)
                .bind(now)
                .bind(&update.key)
                .execute(&mut *conn)
                .await?;
                debug!(key = %update.key, appended, "Inputs changed during processing, deferring");
                return Ok(ApplyOutcome::Deferred);
            }

            let derived = serde_json::to_string(&derived)?;
            let links = links.map(|l| serde_json::to_string(&l)).transpose()?;
            sqlx::query(
                r#"
                UPDATE work_items SET
                    history = ?,
                    comments = ?,
                    derived = ?,
                    links = COALESCE(?, links),
                    sync_status = 'SUCCESS',
                    sync_params = '{}',
                    last_sync_at = ?,
                    updated_at = ?
                WHERE key = ?
                "#,
            )
            .bind(&history)
            .bind(&comments)
            .bind(&derived)
            .bind(links)
            .bind(now)
            .bind(now)
            .bind(&update.key)
            .execute(&mut *conn)
            .await?;
            Ok(ApplyOutcome::Committed(SyncStatus::Success))
        }
        ItemOutcome::Failed { reason } => {
            if current_revision != update.revision {
                debug!(key = %update.key, %reason, "Failure superseded by newer marking");
                return Ok(ApplyOutcome::Deferred);
            }
            sqlx::query(
                "UPDATE work_items SET sync_status = 'FAILED', last_sync_at = ?, updated_at = ? \
                 WHERE key = ?",
            )
            .bind(now)
            .bind(now)
            .bind(&update.key)
            .execute(&mut *conn)
            .await?;
            Ok(ApplyOutcome::Committed(SyncStatus::Failed))
        }
    }
}

/// Record a change request on its target and mark it PENDING (light)
pub async fn add_pending_request(
    pool: &SqlitePool,
    key: &str,
    request_id: &str,
) -> Result<Option<ItemKind>> {
    edit_pending_requests(pool, key, request_id, true).await
}

/// Remove a change request from its target and mark it PENDING (light)
pub async fn remove_pending_request(
    pool: &SqlitePool,
    key: &str,
    request_id: &str,
) -> Result<Option<ItemKind>> {
    edit_pending_requests(pool, key, request_id, false).await
}

async fn edit_pending_requests(
    pool: &SqlitePool,
    key: &str,
    request_id: &str,
    add: bool,
) -> Result<Option<ItemKind>> {
    let key = key.to_string();
    let request_id = request_id.to_string();
    with_write_txn(pool, move |conn| {
        Box::pin(async move { edit_pending_requests_in(conn, &key, &request_id, add).await })
    })
    .await
}

async fn edit_pending_requests_in(
    conn: &mut SqliteConnection,
    key: &str,
    request_id: &str,
    add: bool,
) -> Result<Option<ItemKind>> {
    let row = sqlx::query("SELECT pending_requests FROM work_items WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut pending: Vec<String> =
        decode("pending_requests", row.get::<&str, _>("pending_requests"))?;
    pending.retain(|id| id != request_id);
    if add {
        pending.push(request_id.to_string());
    }

    sqlx::query("UPDATE work_items SET pending_requests = ? WHERE key = ?")
        .bind(serde_json::to_string(&pending)?)
        .bind(key)
        .execute(&mut *conn)
        .await?;

    mark_pending_in(conn, key, SyncParams::light()).await
}

/// Replace an item's links and mark it PENDING (light)
pub async fn set_links(pool: &SqlitePool, key: &str, links: &ItemLinks) -> Result<Option<ItemKind>> {
    let key = key.to_string();
    let links = serde_json::to_string(links)?;
    with_write_txn(pool, move |conn| {
        Box::pin(async move { set_links_in(conn, &key, &links).await })
    })
    .await
}

async fn set_links_in(
    conn: &mut SqliteConnection,
    key: &str,
    links: &str,
) -> Result<Option<ItemKind>> {
    let result = sqlx::query("UPDATE work_items SET links = ? WHERE key = ?")
        .bind(links)
        .bind(key)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    mark_pending_in(conn, key, SyncParams::light()).await
}

/// Set `active = false` on derived code reviews, rejections and defects for one event
///
/// Returns how many elements were flipped.
pub async fn deactivate_event(pool: &SqlitePool, key: &str, event_id: &str) -> Result<usize> {
    let key = key.to_string();
    let event_id = event_id.to_string();
    with_write_txn(pool, move |conn| {
        Box::pin(async move { deactivate_event_in(conn, &key, &event_id).await })
    })
    .await
}

async fn deactivate_event_in(conn: &mut SqliteConnection, key: &str, event_id: &str) -> Result<usize> {
    let row = sqlx::query("SELECT derived FROM work_items WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Err(Error::NotFound(format!("Work item {}", key)));
    };

    let mut derived: DerivedFields = decode("derived", row.get::<&str, _>("derived"))?;
    let mut flipped = 0;
    for review in derived.code_reviews.iter_mut().filter(|r| r.event_id == event_id) {
        flipped += usize::from(review.active);
        review.active = false;
    }
    for rejection in derived.rejections.iter_mut().filter(|r| r.event_id == event_id) {
        flipped += usize::from(rejection.active);
        rejection.active = false;
    }
    for defect in derived.defects.iter_mut().filter(|d| d.child_key == event_id) {
        flipped += usize::from(defect.active);
        defect.active = false;
    }

    sqlx::query("UPDATE work_items SET derived = ? WHERE key = ?")
        .bind(serde_json::to_string(&derived)?)
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(flipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::models::{ItemSnapshot, Rejection};

    fn source_item(key: &str, updated_at: i64) -> SourceItem {
        SourceItem {
            key: key.to_string(),
            updated_at,
            snapshot: ItemSnapshot {
                title: Some(format!("Title of {}", key)),
                updated_at,
                ..Default::default()
            },
            raw: serde_json::json!({ "key": key }),
        }
    }

    fn event(id: &str) -> HistoryEvent {
        HistoryEvent {
            id: id.to_string(),
            actor: Some("alice".into()),
            at: 1,
            changes: Vec::new(),
            activity: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_derived_and_resets_status() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();

        upsert_from_source(pool, "KEY", ItemKind::Issue, &[source_item("KEY-1", 10)])
            .await
            .unwrap();
        let item = get(pool, "KEY-1").await.unwrap().unwrap();
        assert_eq!(item.sync_status, SyncStatus::Pending);
        assert!(item.history.is_empty());

        let update = ItemUpdate {
            key: "KEY-1".into(),
            revision: item.revision,
            outcome: ItemOutcome::Processed {
                new_events: vec![event("1")],
                new_comments: Vec::new(),
                derived: DerivedFields {
                    sprint_ids: vec![7],
                    ..Default::default()
                },
                links: None,
            },
        };
        assert_eq!(
            apply_update(pool, update).await.unwrap(),
            ApplyOutcome::Committed(SyncStatus::Success)
        );

        upsert_from_source(pool, "KEY", ItemKind::Issue, &[source_item("KEY-1", 20)])
            .await
            .unwrap();
        let item = get(pool, "KEY-1").await.unwrap().unwrap();
        assert_eq!(item.sync_status, SyncStatus::Pending);
        assert_eq!(item.snapshot.updated_at, 20);
        assert_eq!(item.history.len(), 1);
        assert_eq!(item.derived.sprint_ids, vec![7]);
    }

    #[tokio::test]
    async fn test_apply_update_defers_when_revision_moved() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();
        upsert_from_source(pool, "KEY", ItemKind::Issue, &[source_item("KEY-1", 10)])
            .await
            .unwrap();
        let loaded = get(pool, "KEY-1").await.unwrap().unwrap();

        // Marked again while the batch is in flight
        mark_pending(pool, "KEY-1", SyncParams::light()).await.unwrap();

        let update = ItemUpdate {
            key: "KEY-1".into(),
            revision: loaded.revision,
            outcome: ItemOutcome::Processed {
                new_events: vec![event("1"), event("1")],
                new_comments: Vec::new(),
                derived: DerivedFields::default(),
                links: None,
            },
        };
        assert_eq!(apply_update(pool, update).await.unwrap(), ApplyOutcome::Deferred);

        let item = get(pool, "KEY-1").await.unwrap().unwrap();
        assert_eq!(item.sync_status, SyncStatus::Pending);
        assert_eq!(item.history.len(), 1);
        // Light marking does not downgrade the full pass left by ingestion
        assert_eq!(item.sync_params, SyncParams::full());
    }

    #[tokio::test]
    async fn test_batch_commit_is_conditional_per_item() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();
        let items: Vec<_> = (1..=3).map(|i| source_item(&format!("KEY-{}", i), i)).collect();
        upsert_from_source(pool, "KEY", ItemKind::Issue, &items).await.unwrap();
        let loaded = claim_pending(pool, ItemKind::Issue, 3).await.unwrap();

        mark_pending(pool, "KEY-2", SyncParams::light()).await.unwrap();

        let processed = |item: &WorkItem| ItemUpdate {
            key: item.key.clone(),
            revision: item.revision,
            outcome: ItemOutcome::Processed {
                new_events: vec![event("1")],
                new_comments: Vec::new(),
                derived: DerivedFields::default(),
                links: None,
            },
        };
        let mut updates: Vec<_> = loaded.iter().map(processed).collect();
        updates.push(ItemUpdate {
            key: "KEY-404".into(),
            revision: 1,
            outcome: ItemOutcome::Failed {
                reason: "gone".into(),
            },
        });

        let outcomes: Vec<ApplyOutcome> = apply_updates(pool, updates)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ApplyOutcome::Committed(SyncStatus::Success),
                ApplyOutcome::Deferred,
                ApplyOutcome::Committed(SyncStatus::Success),
                ApplyOutcome::Missing,
            ]
        );

        let deferred = get(pool, "KEY-2").await.unwrap().unwrap();
        assert_eq!(deferred.sync_status, SyncStatus::Pending);
        assert_eq!(deferred.history.len(), 1);
        assert!(apply_updates(pool, Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_oldest_first_and_limited() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();
        let items: Vec<_> = (1..=5).map(|i| source_item(&format!("KEY-{}", i), i)).collect();
        upsert_from_source(pool, "KEY", ItemKind::Issue, &items).await.unwrap();

        let claimed = claim_pending(pool, ItemKind::Issue, 3).await.unwrap();
        let keys: Vec<_> = claimed.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["KEY-1", "KEY-2", "KEY-3"]);

        assert!(claim_pending(pool, ItemKind::PullRequest, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_event_flips_matching_elements() {
        let store = Store::open_memory().await.unwrap();
        let pool = store.pool().unwrap();
        upsert_from_source(pool, "KEY", ItemKind::Issue, &[source_item("KEY-1", 10)])
            .await
            .unwrap();
        let item = get(pool, "KEY-1").await.unwrap().unwrap();

        let rejection = |id: &str| Rejection {
            event_id: id.to_string(),
            actor: "alice".into(),
            rejected_by: None,
            at: 1,
            active: true,
        };
        let update = ItemUpdate {
            key: "KEY-1".into(),
            revision: item.revision,
            outcome: ItemOutcome::Processed {
                new_events: Vec::new(),
                new_comments: Vec::new(),
                derived: DerivedFields {
                    rejections: vec![rejection("10"), rejection("11")],
                    ..Default::default()
                },
                links: None,
            },
        };
        apply_update(pool, update).await.unwrap();

        assert_eq!(deactivate_event(pool, "KEY-1", "10").await.unwrap(), 1);
        let item = get(pool, "KEY-1").await.unwrap().unwrap();
        assert!(!item.derived.rejections[0].active);
        assert!(item.derived.rejections[1].active);
    }
}
