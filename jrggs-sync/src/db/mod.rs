//! Document store on SQLite
//!
//! `Store` has an explicit two-phase lifecycle: [`Store::new`] only records
//! where the database lives, [`Store::initialize`] opens the pool and creates
//! tables. Any use before initialization fails with `Error::NotInitialized`.
//!
//! Each table holds one JSON document per row plus the scalar columns the
//! engine filters on. Every per-document update is atomic; there are no
//! cross-document transactions.

pub mod change_requests;
pub mod contributors;
pub mod items;
pub mod overrides;
pub mod schema;
pub mod watermarks;

use futures::future::BoxFuture;
use jrggs_common::db::{init_database, init_memory_database, DEFAULT_MAX_CONNECTIONS};
use jrggs_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Where the store lives
#[derive(Debug, Clone)]
pub enum StoreConfig {
    File {
        path: PathBuf,
        max_connections: u32,
    },
    /// Private in-memory database, used by tests
    Memory,
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        StoreConfig::File {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Shared store handle
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
    pool: Arc<OnceCell<SqlitePool>>,
}

impl Store {
    /// Build a configuration-only handle; no connection is opened
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            pool: Arc::new(OnceCell::new()),
        }
    }

    /// Connect and create tables
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn initialize(&self) -> Result<()> {
        let config = self.config.clone();
        self.pool
            .get_or_try_init(|| async move {
                let pool = match &config {
                    StoreConfig::File {
                        path,
                        max_connections,
                    } => init_database(path, *max_connections).await?,
                    StoreConfig::Memory => init_memory_database().await?,
                };
                schema::create_tables(&pool).await?;
                info!(store = ?config, "Store initialized");
                Ok::<_, Error>(pool)
            })
            .await?;
        Ok(())
    }

    /// Build and initialize an in-memory store
    pub async fn open_memory() -> Result<Self> {
        let store = Self::new(StoreConfig::Memory);
        store.initialize().await?;
        Ok(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// Live pool, or `NotInitialized` before [`Store::initialize`]
    pub fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get().ok_or_else(|| {
            Error::NotInitialized("Store used before initialize()".to_string())
        })
    }
}

/// Run `op` inside a `BEGIN IMMEDIATE` transaction on one connection
///
/// The write lock is taken up front so a read-modify-write on a single
/// document cannot interleave with another writer. `op` must only use the
/// connection it is handed; the in-memory pool has a single connection.
pub async fn with_write_txn<T, E, F>(pool: &SqlitePool, op: F) -> std::result::Result<T, E>
where
    T: Send,
    E: From<sqlx::Error> + Send,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
{
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    match op(&mut *conn).await {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(value),
            Err(e) => {
                rollback(&mut *conn).await;
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(&mut *conn).await;
            Err(e)
        }
    }
}

async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!("Rollback failed: {}", e);
    }
}

/// Decode a JSON document column
pub(crate) fn decode<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}
