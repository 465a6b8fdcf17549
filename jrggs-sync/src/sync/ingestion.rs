//! Watermark-based incremental ingestion
//!
//! A pass lists items updated since the scope's watermark page by page,
//! upserts them as PENDING, and only then advances the watermark to the
//! newest update time seen plus one. A pass that errors or runs past
//! `max_pages` leaves the watermark where it was, so nothing is skipped.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use jrggs_common::events::{EventBus, SyncEvent};

use super::{fetch_with_timeout, QueueSet};
use crate::db::{items, watermarks, Store};
use crate::error::SyncResult;
use crate::settings::EngineSettings;
use crate::source::{SourceAdapter, SourceItem};
use crate::utils::NamedLocks;

/// Result of one [`WatermarkSync::sync`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another pass for the same scope was running
    Skipped,
    Completed { items: usize, watermark: i64 },
    /// Gave up without touching the store or the watermark
    Aborted { reason: String },
}

/// Ingestion driver for one source adapter
pub struct WatermarkSync {
    store: Store,
    source: Arc<dyn SourceAdapter>,
    locks: NamedLocks,
    events: EventBus,
    queues: QueueSet,
    settings: Arc<EngineSettings>,
}

impl WatermarkSync {
    pub fn new(
        store: Store,
        source: Arc<dyn SourceAdapter>,
        locks: NamedLocks,
        events: EventBus,
        queues: QueueSet,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            source,
            locks,
            events,
            queues,
            settings,
        }
    }

    /// Scope served by the underlying source
    pub fn scope(&self) -> String {
        self.source.scope()
    }

    /// Run one pass for `scope` unless one is already running
    pub async fn sync(&self, scope: &str) -> SyncResult<SyncOutcome> {
        let lock_key = format!("sync:{}", scope);
        match self
            .locks
            .try_with_lock(&lock_key, || self.sync_locked(scope))
            .await
        {
            Some(outcome) => outcome,
            None => {
                debug!(scope, "Ingestion already running, skipping");
                Ok(SyncOutcome::Skipped)
            }
        }
    }

    async fn sync_locked(&self, scope: &str) -> SyncResult<SyncOutcome> {
        let pool = self.store.pool()?;
        let watermark = watermarks::get(pool, scope)
            .await?
            .unwrap_or(self.settings.default_watermark);
        debug!(scope, watermark, "Ingestion pass starting");

        let fetched = match self.fetch_all(scope, watermark).await? {
            Ok(items) => items,
            Err(reason) => {
                error!(scope, %reason, "Ingestion aborted, watermark unchanged");
                self.events.emit_lossy(SyncEvent::IngestionAborted {
                    scope: scope.to_string(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                return Ok(SyncOutcome::Aborted { reason });
            }
        };

        if fetched.is_empty() {
            debug!(scope, "No updated items");
            return Ok(SyncOutcome::Completed {
                items: 0,
                watermark,
            });
        }

        let kind = self.source.kind();
        let upserted = items::upsert_from_source(pool, scope, kind, &fetched).await?;

        let newest = fetched.iter().map(|i| i.updated_at).max().unwrap_or(watermark);
        let stored = watermarks::advance(pool, scope, newest + 1).await?;

        info!(scope, items = upserted, watermark = stored, "Ingestion pass completed");
        self.events.emit_lossy(SyncEvent::IngestionCompleted {
            scope: scope.to_string(),
            items: upserted,
            watermark: Some(stored),
            timestamp: Utc::now(),
        });
        self.queues.wake(kind);

        Ok(SyncOutcome::Completed {
            items: upserted,
            watermark: stored,
        })
    }

    /// Fetch every page newer than `watermark`
    ///
    /// The inner `Err` is an abort reason; the outer one a fetch failure.
    /// Items are deduplicated by key, keeping the latest update.
    async fn fetch_all(
        &self,
        scope: &str,
        watermark: i64,
    ) -> SyncResult<Result<Vec<SourceItem>, String>> {
        let timeout = self.settings.fetch_timeout();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        let mut fetched: Vec<SourceItem> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let what = format!("items of {} page {}", scope, pages + 1);
            let page = fetch_with_timeout(
                timeout,
                &what,
                self.source.list_updated_since(
                    scope,
                    watermark,
                    self.settings.page_size,
                    cursor.as_deref(),
                ),
            )
            .await?;
            pages += 1;

            let mut newer = 0;
            for item in page.items.into_iter().filter(|i| i.updated_at >= watermark) {
                newer += 1;
                match by_key.get(&item.key) {
                    Some(&index) if fetched[index].updated_at <= item.updated_at => {
                        fetched[index] = item;
                    }
                    Some(_) => {}
                    None => {
                        by_key.insert(item.key.clone(), fetched.len());
                        fetched.push(item);
                    }
                }
            }

            if newer == 0 && self.source.lists_newest_first() {
                debug!(scope, pages, "Page has nothing newer than watermark, stopping");
                break;
            }
            match page.next {
                None => break,
                Some(_) if pages >= self.settings.max_pages => {
                    return Ok(Err(format!(
                        "more than {} pages of updates since {}",
                        self.settings.max_pages, watermark
                    )));
                }
                Some(next) => cursor = Some(next),
            }
        }

        Ok(Ok(fetched))
    }
}
