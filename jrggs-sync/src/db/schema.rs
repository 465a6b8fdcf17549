//! Table definitions

use jrggs_common::Result;
use sqlx::SqlitePool;

const CREATE_WORK_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS work_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    scope TEXT NOT NULL,
    raw TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    parent_key TEXT,
    history TEXT NOT NULL DEFAULT '[]',
    comments TEXT NOT NULL DEFAULT '[]',
    sync_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (sync_status IN ('PENDING', 'SUCCESS', 'FAILED')),
    sync_params TEXT NOT NULL DEFAULT '{}',
    derived TEXT NOT NULL DEFAULT '{}',
    links TEXT NOT NULL DEFAULT '{}',
    pending_requests TEXT NOT NULL DEFAULT '[]',
    revision INTEGER NOT NULL DEFAULT 0,
    last_sync_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_OVERRIDES: &str = r#"
CREATE TABLE IF NOT EXISTS overrides (
    key TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_CHANGE_REQUESTS: &str = r#"
CREATE TABLE IF NOT EXISTS change_requests (
    id TEXT PRIMARY KEY,
    request_type TEXT NOT NULL,
    target_key TEXT NOT NULL,
    data TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    justification TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL
        CHECK (status IN ('PENDING', 'APPROVED', 'REJECTED', 'CANCELLED')),
    requester_id TEXT NOT NULL,
    processed_by TEXT,
    processed_at INTEGER,
    rejection_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_CONTRIBUTORS: &str = r#"
CREATE TABLE IF NOT EXISTS contributors (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    role TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_work_items_claim ON work_items (kind, sync_status, id)",
    "CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items (parent_key)",
    "CREATE INDEX IF NOT EXISTS idx_work_items_scope ON work_items (scope)",
    // At most one PENDING request per (target, type)
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_change_requests_pending \
     ON change_requests (target_key, request_type) WHERE status = 'PENDING'",
    "CREATE INDEX IF NOT EXISTS idx_change_requests_status ON change_requests (status, created_at)",
];

/// Create every engine table and index
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    for ddl in [
        CREATE_WORK_ITEMS,
        CREATE_OVERRIDES,
        CREATE_CHANGE_REQUESTS,
        CREATE_CONTRIBUTORS,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
