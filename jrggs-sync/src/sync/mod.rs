//! Background synchronization
//!
//! Ingestion pulls changed items into the store as PENDING; one processing
//! queue per item kind turns PENDING items into SUCCESS or FAILED.
//! Processors never write to the store themselves: they return a
//! [`ProcessedItem`] and the queue commits it.

pub mod ingestion;
pub mod issue_processor;
pub mod pr_processor;
pub mod queue;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::models::{Comment, DerivedFields, HistoryEvent, ItemKind, ItemLinks, WorkItem};
use crate::source::SourceError;

pub use ingestion::{SyncOutcome, WatermarkSync};
pub use issue_processor::IssueProcessor;
pub use pr_processor::PullRequestProcessor;
pub use queue::{BatchStats, ProcessingQueue};

/// Everything one processing pass produced for one item
#[derive(Debug, Clone, Default)]
pub struct ProcessedItem {
    /// Events fetched beyond the stored history
    pub new_events: Vec<HistoryEvent>,
    pub new_comments: Vec<Comment>,
    pub derived: DerivedFields,
    /// Replacement links, `None` to keep the stored ones
    pub links: Option<ItemLinks>,
    /// Other items to mark PENDING (light) once this result is committed
    pub cascade: Vec<String>,
}

/// Per-kind processing step run by a [`ProcessingQueue`]
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    fn kind(&self) -> ItemKind;

    /// Fetch deltas and derive fields for a freshly loaded item
    ///
    /// Errors for which [`SyncError::is_item_local`] holds mark the item
    /// FAILED; any other error leaves it PENDING for a later tick.
    async fn process(&self, item: WorkItem) -> SyncResult<ProcessedItem>;
}

/// Registry of the running queues, used to wake a queue by item kind
///
/// Holds weak references so queues that wake each other do not keep each
/// other alive.
#[derive(Debug, Clone, Default)]
pub struct QueueSet {
    queues: Arc<RwLock<HashMap<ItemKind, Weak<ProcessingQueue>>>>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: &Arc<ProcessingQueue>) {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        queues.insert(queue.kind(), Arc::downgrade(queue));
    }

    pub fn get(&self, kind: ItemKind) -> Option<Arc<ProcessingQueue>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.get(&kind).and_then(Weak::upgrade)
    }

    /// Non-blocking wake of the queue for `kind`; a no-op if none is registered
    pub fn wake(&self, kind: ItemKind) {
        if let Some(queue) = self.get(kind) {
            queue.wake();
        }
    }
}

/// Await an outbound source call with a fixed timeout
///
/// An elapsed timeout becomes [`SyncError::TransientFetch`].
pub(crate) async fn fetch_with_timeout<T, Fut>(
    timeout: Duration,
    what: &str,
    call: Fut,
) -> SyncResult<T>
where
    Fut: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::TransientFetch(format!(
            "{} timed out after {}s",
            what,
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_timeout_is_transient() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, SourceError>(1)
        };
        let err = fetch_with_timeout(Duration::from_millis(10), "events of KEY-1", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TransientFetch(_)));
        assert!(err.is_item_local());
    }

    #[tokio::test]
    async fn test_parse_error_is_computation() {
        let bad = async { Err::<i32, _>(SourceError::Parse("bad date".into())) };
        let err = fetch_with_timeout(Duration::from_secs(1), "comments", bad)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Computation(_)));
    }

    #[test]
    fn test_wake_without_queue_is_noop() {
        let queues = QueueSet::new();
        queues.wake(ItemKind::Issue);
        assert!(queues.get(ItemKind::PullRequest).is_none());
    }
}
