//! Event types and broadcast bus
//!
//! Background ticks publish what they did so that observers (logs, a
//! future UI stream, tests) can follow progress without polling the store.
//! Publishing is lossy: with no subscriber the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// An ingestion pass completed and upserted `items` work items
    IngestionCompleted {
        scope: String,
        items: usize,
        watermark: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// An ingestion pass gave up; the watermark was not advanced
    IngestionAborted {
        scope: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A processing batch was committed
    BatchProcessed {
        queue: String,
        succeeded: usize,
        failed: usize,
        deferred: usize,
        timestamp: DateTime<Utc>,
    },

    /// A change request reached a terminal status
    ChangeRequestResolved {
        request_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`SyncEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
