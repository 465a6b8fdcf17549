//! Test helper utilities
//!
//! A scripted in-memory source adapter plus builders for items, events and
//! engines over an in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jrggs_common::events::EventBus;
use jrggs_sync::db::contributors::Contributor;
use jrggs_sync::db::items::ItemFilter;
use jrggs_sync::db::Store;
use jrggs_sync::models::{
    Activity, Comment, FieldChange, HistoryEvent, ItemKind, ItemSnapshot, SyncStatus,
};
use jrggs_sync::settings::EngineSettings;
use jrggs_sync::source::{SourceAdapter, SourceError, SourceItem, SourcePage};
use jrggs_sync::Engine;

#[derive(Default)]
struct FakeState {
    items: Vec<SourceItem>,
    events: HashMap<String, Vec<HistoryEvent>>,
    comments: HashMap<String, Vec<Comment>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    list_calls: usize,
    event_calls: Vec<(String, usize)>,
}

/// How a [`FakeSource`] answers listing calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    /// Items at or after the exact watermark, oldest first
    Exact,
    /// Every item, newest first, ignoring the watermark
    NewestFirst,
    /// Items at or after the watermark rounded down to the minute, oldest
    /// first, like a query language with minute-precision date literals
    MinuteFloor,
}

/// Scripted source
pub struct FakeSource {
    kind: ItemKind,
    scope: String,
    listing: Listing,
    state: Mutex<FakeState>,
}

impl FakeSource {
    fn with_listing(kind: ItemKind, scope: &str, listing: Listing) -> Arc<Self> {
        Arc::new(Self {
            kind,
            scope: scope.to_string(),
            listing,
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn new(kind: ItemKind, scope: &str) -> Arc<Self> {
        Self::with_listing(kind, scope, Listing::Exact)
    }

    pub fn newest_first(kind: ItemKind, scope: &str) -> Arc<Self> {
        Self::with_listing(kind, scope, Listing::NewestFirst)
    }

    pub fn minute_floor(kind: ItemKind, scope: &str) -> Arc<Self> {
        Self::with_listing(kind, scope, Listing::MinuteFloor)
    }

    /// Add or replace an item
    pub fn put_item(&self, item: SourceItem) {
        let mut state = self.state.lock().unwrap();
        state.items.retain(|i| i.key != item.key);
        state.items.push(item);
    }

    pub fn push_events(&self, key: &str, events: Vec<HistoryEvent>) {
        let mut state = self.state.lock().unwrap();
        state.events.entry(key.to_string()).or_default().extend(events);
    }

    pub fn push_comments(&self, key: &str, comments: Vec<Comment>) {
        let mut state = self.state.lock().unwrap();
        state.comments.entry(key.to_string()).or_default().extend(comments);
    }

    /// Event fetches for `key` fail with a network error
    pub fn fail_events(&self, key: &str) {
        self.state.lock().unwrap().failing.insert(key.to_string());
    }

    /// Event fetches for `key` never answer
    pub fn hang_events(&self, key: &str) {
        self.state.lock().unwrap().hanging.insert(key.to_string());
    }

    pub fn heal(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.remove(key);
        state.hanging.remove(key);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Offsets requested for `key`, in call order
    pub fn event_offsets(&self, key: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .event_calls
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn kind(&self) -> ItemKind {
        self.kind
    }

    fn scope(&self) -> String {
        self.scope.clone()
    }

    fn lists_newest_first(&self) -> bool {
        self.listing == Listing::NewestFirst
    }

    async fn list_updated_since(
        &self,
        _scope: &str,
        watermark: i64,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        let lower = match self.listing {
            Listing::Exact => watermark,
            Listing::NewestFirst => i64::MIN,
            Listing::MinuteFloor => watermark - watermark.rem_euclid(60_000),
        };
        let mut matching: Vec<SourceItem> = state
            .items
            .iter()
            .filter(|i| i.updated_at >= lower)
            .cloned()
            .collect();
        if self.listing == Listing::NewestFirst {
            matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        } else {
            matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        }

        let start: usize = cursor
            .map(|c| c.parse().unwrap())
            .unwrap_or(0)
            .min(matching.len());
        let end = (start + page_size as usize).min(matching.len());
        let items = matching[start..end].to_vec();
        let next = (end < matching.len()).then(|| end.to_string());

        Ok(SourcePage { items, next })
    }

    async fn get_events_since(
        &self,
        key: &str,
        offset: usize,
    ) -> Result<Vec<HistoryEvent>, SourceError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.event_calls.push((key.to_string(), offset));
            if state.failing.contains(key) {
                return Err(SourceError::Network(format!("connection reset for {}", key)));
            }
            state.hanging.contains(key)
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .get(key)
            .map(|events| events.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_comments_since(&self, key: &str, offset: usize) -> Result<Vec<Comment>, SourceError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .comments
            .get(key)
            .map(|comments| comments.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }
}

pub fn as_source(source: &Arc<FakeSource>) -> Arc<dyn SourceAdapter> {
    source.clone()
}

/// Engine settings suited to tests: small pages, one second timeouts
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        batch_size: 10,
        page_size: 2,
        max_pages: 10,
        fetch_timeout_secs: 1,
        link_prefixes: vec!["KEY".to_string()],
        ..Default::default()
    }
}

pub fn issue(key: &str, updated_at: i64) -> SourceItem {
    SourceItem {
        key: key.to_string(),
        updated_at,
        snapshot: ItemSnapshot {
            title: Some(format!("Issue {}", key)),
            status: Some("To Do".to_string()),
            updated_at,
            ..Default::default()
        },
        raw: serde_json::json!({ "key": key }),
    }
}

pub fn pull_request(key: &str, title: &str, author: &str, updated_at: i64) -> SourceItem {
    SourceItem {
        key: key.to_string(),
        updated_at,
        snapshot: ItemSnapshot {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            state: Some("OPEN".to_string()),
            updated_at,
            ..Default::default()
        },
        raw: serde_json::json!({ "id": key }),
    }
}

/// Status transition by `actor`
pub fn status_event(id: &str, actor: &str, at: i64, to: &str) -> HistoryEvent {
    HistoryEvent {
        id: id.to_string(),
        actor: Some(actor.to_string()),
        at,
        changes: vec![FieldChange {
            field: "status".to_string(),
            to_text: Some(to.to_string()),
            ..Default::default()
        }],
        activity: None,
    }
}

pub fn comment_activity(id: &str, actor: &str, at: i64, body: &str) -> HistoryEvent {
    HistoryEvent {
        id: id.to_string(),
        actor: Some(actor.to_string()),
        at,
        changes: Vec::new(),
        activity: Some(Activity::Comment {
            body: body.to_string(),
        }),
    }
}

pub fn approval(id: &str, actor: &str, at: i64) -> HistoryEvent {
    HistoryEvent {
        id: id.to_string(),
        actor: Some(actor.to_string()),
        at,
        changes: Vec::new(),
        activity: Some(Activity::Approval),
    }
}

/// `[CodeReview(alice), Rejected, CodeReview(bob), Rejected]`
pub fn rejection_history() -> Vec<HistoryEvent> {
    vec![
        status_event("e1", "alice", 100, "Code Review"),
        status_event("e2", "carol", 200, "Rejected"),
        status_event("e3", "bob", 300, "Code Review"),
        status_event("e4", "carol", 400, "Rejected"),
    ]
}

pub fn reviewer(id: &str) -> Contributor {
    Contributor {
        id: id.to_string(),
        display_name: None,
        role: "reviewer".to_string(),
    }
}

/// Engine over a fresh in-memory store
pub async fn engine_with(sources: Vec<Arc<dyn SourceAdapter>>) -> Engine {
    let store = Store::open_memory().await.unwrap();
    Engine::new(store, test_settings(), EventBus::new(64), sources).unwrap()
}

/// Run the queues until no item is PENDING and no tick is running
pub async fn settle(engine: &Engine) {
    for _ in 0..400 {
        for queue in engine.processing_queues() {
            queue.check_to_process().await.unwrap();
        }
        let busy = engine.processing_queues().iter().any(|q| q.is_running());
        let pending = engine
            .items(&ItemFilter {
                status: Some(SyncStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        if !busy && pending.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queues did not settle");
}

pub const PR_SCOPE: &str = "acme/backend";
pub const PR_KEY: &str = "acme/backend#1";

/// Issues KEY-1 (rejection history), KEY-42..44 and one pull request
/// titled "Fix bug KEY-42" with a comment mentioning key-43, all ingested
/// and processed
pub struct Workspace {
    pub engine: Engine,
    pub issues: Arc<FakeSource>,
    pub prs: Arc<FakeSource>,
}

pub async fn workspace() -> Workspace {
    let issues = FakeSource::new(ItemKind::Issue, "KEY");
    let mut rejected = issue("KEY-1", 1_000);
    rejected.snapshot.story_points = Some(5);
    issues.put_item(rejected);
    issues.push_events("KEY-1", rejection_history());
    for (n, at) in [(42, 1_100), (43, 1_200), (44, 1_300)] {
        issues.put_item(issue(&format!("KEY-{}", n), at));
    }

    let prs = FakeSource::new(ItemKind::PullRequest, PR_SCOPE);
    prs.put_item(pull_request(PR_KEY, "Fix bug KEY-42", "erin", 2_000));
    prs.push_events(
        PR_KEY,
        vec![
            comment_activity("comment:1", "bob", 2_100, "see key-43"),
            approval("approval:bob:2200", "bob", 2_200),
        ],
    );

    let engine = engine_with(vec![as_source(&issues), as_source(&prs)]).await;
    engine.upsert_contributor(&reviewer("alice")).await.unwrap();
    engine.upsert_contributor(&reviewer("bob")).await.unwrap();
    engine.sync_scope("KEY").await.unwrap();
    engine.sync_scope(PR_SCOPE).await.unwrap();
    settle(&engine).await;

    Workspace {
        engine,
        issues,
        prs,
    }
}
