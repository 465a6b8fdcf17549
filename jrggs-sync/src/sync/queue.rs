//! Single-flight processing queue
//!
//! One queue per item kind. A tick claims up to `batch_size` PENDING items
//! under the `claim:<QUEUE>` lock, processes them concurrently, commits the
//! results in one write (each conditional on its item's revision), and keeps
//! draining while batches make progress.
//!
//! `running` keeps ticks from overlapping. `wake_requested` is cleared at
//! the top of every batch and re-checked after `running` is lowered, so a
//! wake that arrives while a tick is finishing always gets a following pass.

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use jrggs_common::events::{EventBus, SyncEvent};

use super::{ItemProcessor, QueueSet};
use crate::db::items::{self, ApplyOutcome, ItemOutcome, ItemUpdate};
use crate::db::Store;
use crate::error::SyncResult;
use crate::models::{ItemKind, SyncParams, SyncStatus};
use crate::utils::{with_catch, NamedLocks};

/// Counters for one or more batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Left PENDING: inputs changed mid-pass, or a non item-local error
    pub deferred: usize,
    /// Already processed or removed by the time it was loaded
    pub skipped: usize,
}

impl BatchStats {
    /// Items whose status moved out of PENDING
    pub fn committed(&self) -> usize {
        self.succeeded + self.failed
    }

    fn merge(&mut self, other: &BatchStats) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

/// Lowers the running flag on every exit path
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Processing queue for one item kind
pub struct ProcessingQueue {
    kind: ItemKind,
    store: Store,
    processor: Arc<dyn ItemProcessor>,
    locks: NamedLocks,
    events: EventBus,
    peers: QueueSet,
    batch_size: usize,
    running: AtomicBool,
    wake_requested: AtomicBool,
}

impl ProcessingQueue {
    /// Build the queue for `processor.kind()` and register it with `peers`
    pub fn new(
        store: Store,
        processor: Arc<dyn ItemProcessor>,
        locks: NamedLocks,
        events: EventBus,
        peers: QueueSet,
        batch_size: usize,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            kind: processor.kind(),
            store,
            processor,
            locks,
            events,
            peers: peers.clone(),
            batch_size: batch_size.max(1),
            running: AtomicBool::new(false),
            wake_requested: AtomicBool::new(false),
        });
        peers.register(&queue);
        queue
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask for a processing pass without waiting for it
    ///
    /// Never blocks and never fails. While a tick is running the request is
    /// absorbed by its drain; otherwise a tick is spawned on the current
    /// runtime (outside a runtime the next scheduled tick picks the work up).
    pub fn wake(self: &Arc<Self>) {
        self.wake_requested.store(true, Ordering::SeqCst);
        if self.is_running() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let queue = Arc::clone(self);
                handle.spawn(async move { queue.tick().await });
            }
            Err(_) => debug!(queue = self.name(), "Wake outside runtime, deferred to next tick"),
        }
    }

    /// Scheduled entry point: process and log, never fail
    pub async fn tick(&self) {
        let queue = self.name();
        with_catch(
            |e| error!(queue, error = %e, "Processing tick failed"),
            self.check_to_process(),
        )
        .await;
    }

    /// Drain PENDING items unless a tick is already running
    ///
    /// Returns the totals of every batch this call processed.
    pub async fn check_to_process(&self) -> SyncResult<BatchStats> {
        let mut totals = BatchStats::default();
        loop {
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(queue = self.name(), "Tick already running, skipping");
                return Ok(totals);
            }

            {
                let _running = RunningGuard(&self.running);
                self.drain(&mut totals).await?;
            }

            if !self.wake_requested.load(Ordering::SeqCst) {
                return Ok(totals);
            }
        }
    }

    async fn drain(&self, totals: &mut BatchStats) -> SyncResult<()> {
        loop {
            self.wake_requested.store(false, Ordering::SeqCst);
            let stats = self.run_batch().await?;
            totals.merge(&stats);
            if stats.claimed == 0 || stats.committed() == 0 {
                return Ok(());
            }
        }
    }

    /// Claim, process and commit one batch
    pub async fn run_batch(&self) -> SyncResult<BatchStats> {
        let pool = self.store.pool()?;
        let claim_key = format!("claim:{}", self.name());

        let claimed = self
            .locks
            .try_with_lock(&claim_key, || {
                items::claim_pending(pool, self.kind, self.batch_size)
            })
            .await;
        let claimed = match claimed {
            Some(claimed) => claimed?,
            None => {
                debug!(queue = self.name(), "Claim lock busy, skipping batch");
                return Ok(BatchStats::default());
            }
        };
        if claimed.is_empty() {
            return Ok(BatchStats::default());
        }

        let keys: Vec<String> = claimed.into_iter().map(|item| item.key).collect();
        let mut stats = BatchStats {
            claimed: keys.len(),
            ..Default::default()
        };
        debug!(queue = self.name(), claimed = keys.len(), "Processing batch");

        let results = join_all(keys.iter().map(|key| self.process_one(key))).await;

        let mut updates = Vec::new();
        let mut targets = Vec::new();
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(Some((update, cascade))) => {
                    updates.push(update);
                    targets.push((key, cascade));
                }
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Processing error, item left PENDING");
                    stats.deferred += 1;
                }
            }
        }

        // One write for the batch, each update conditional on its own revision
        let outcomes = match items::apply_updates(pool, updates).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(queue = self.name(), error = %e, "Batch commit failed, items left PENDING");
                stats.deferred += targets.len();
                return Ok(stats);
            }
        };

        let mut cascade = BTreeSet::new();
        for ((key, item_targets), outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(ApplyOutcome::Committed(SyncStatus::Success)) => {
                    stats.succeeded += 1;
                    cascade.extend(item_targets.into_iter().filter(|t| t != key));
                }
                Ok(ApplyOutcome::Committed(_)) => stats.failed += 1,
                Ok(ApplyOutcome::Deferred) => stats.deferred += 1,
                Ok(ApplyOutcome::Missing) => stats.skipped += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Commit failed, item left PENDING");
                    stats.deferred += 1;
                }
            }
        }

        self.cascade(&cascade).await;

        info!(
            queue = self.name(),
            succeeded = stats.succeeded,
            failed = stats.failed,
            deferred = stats.deferred,
            "Batch processed"
        );
        self.events.emit_lossy(SyncEvent::BatchProcessed {
            queue: self.name().to_string(),
            succeeded: stats.succeeded,
            failed: stats.failed,
            deferred: stats.deferred,
            timestamp: Utc::now(),
        });

        Ok(stats)
    }

    /// Reload one claimed item and run the processor on it
    ///
    /// `Ok(None)` means the item is gone or no longer PENDING.
    async fn process_one(&self, key: &str) -> SyncResult<Option<(ItemUpdate, Vec<String>)>> {
        let pool = self.store.pool()?;
        let Some(item) = items::get(pool, key).await? else {
            return Ok(None);
        };
        if item.sync_status != SyncStatus::Pending {
            return Ok(None);
        }

        let revision = item.revision;
        match self.processor.process(item).await {
            Ok(processed) => {
                let update = ItemUpdate {
                    key: key.to_string(),
                    revision,
                    outcome: ItemOutcome::Processed {
                        new_events: processed.new_events,
                        new_comments: processed.new_comments,
                        derived: processed.derived,
                        links: processed.links,
                    },
                };
                Ok(Some((update, processed.cascade)))
            }
            Err(e) if e.is_item_local() => {
                warn!(key = %key, error = %e, "Item marked FAILED");
                let update = ItemUpdate {
                    key: key.to_string(),
                    revision,
                    outcome: ItemOutcome::Failed {
                        reason: e.to_string(),
                    },
                };
                Ok(Some((update, Vec::new())))
            }
            Err(e) => Err(e),
        }
    }

    /// Mark linked items PENDING (light) and wake their queues
    async fn cascade(&self, targets: &BTreeSet<String>) {
        let Ok(pool) = self.store.pool() else {
            return;
        };
        for target in targets {
            match items::mark_pending(pool, target, SyncParams::light()).await {
                Ok(Some(kind)) => {
                    debug!(from = self.name(), key = %target, "Cascade marked PENDING");
                    self.peers.wake(kind);
                }
                Ok(None) => debug!(key = %target, "Cascade target not tracked"),
                Err(e) => warn!(key = %target, error = %e, "Cascade marking failed"),
            }
        }
    }
}
