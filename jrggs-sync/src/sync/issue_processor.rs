//! Issue processing step
//!
//! Fetches changelog and comment deltas from the item's stored offsets,
//! then derives metrics from the merged history, the current override,
//! the contributor roles and the item's defect children.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{fetch_with_timeout, ItemProcessor, ProcessedItem};
use crate::db::items::{self, merged_history};
use crate::db::{overrides, Store};
use crate::directory::ContributorDirectory;
use crate::error::SyncResult;
use crate::metrics::{derive_issue, ChildItem, IssueInputs};
use crate::models::{ItemKind, SyncParams, WorkItem};
use crate::settings::EngineSettings;
use crate::source::SourceAdapter;

pub struct IssueProcessor {
    store: Store,
    source: Arc<dyn SourceAdapter>,
    directory: Arc<ContributorDirectory>,
    settings: Arc<EngineSettings>,
}

impl IssueProcessor {
    pub fn new(
        store: Store,
        source: Arc<dyn SourceAdapter>,
        directory: Arc<ContributorDirectory>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            source,
            directory,
            settings,
        }
    }

    async fn children(&self, key: &str) -> SyncResult<Vec<ChildItem>> {
        let pool = self.store.pool()?;
        let mut children = Vec::new();
        for child in items::find_children(pool, key).await? {
            let child_overrides = overrides::get(pool, &child.key).await?;
            children.push(ChildItem::from_item(&child, &child_overrides));
        }
        Ok(children)
    }
}

/// Offsets of the next history and comment pages
///
/// Always taken from the item as loaded for this pass.
fn offsets(item: &WorkItem) -> (usize, usize) {
    if item.sync_params.refresh_history {
        (0, 0)
    } else {
        (item.history.len(), item.comments.len())
    }
}

#[async_trait]
impl ItemProcessor for IssueProcessor {
    fn kind(&self) -> ItemKind {
        ItemKind::Issue
    }

    async fn process(&self, item: WorkItem) -> SyncResult<ProcessedItem> {
        let SyncParams {
            skip_history,
            skip_comments,
            ..
        } = item.sync_params;
        let (event_offset, comment_offset) = offsets(&item);
        let timeout = self.settings.fetch_timeout();

        let new_events = if skip_history {
            Vec::new()
        } else {
            let what = format!("changelog of {}", item.key);
            fetch_with_timeout(
                timeout,
                &what,
                self.source.get_events_since(&item.key, event_offset),
            )
            .await?
        };
        let new_comments = if skip_comments {
            Vec::new()
        } else {
            let what = format!("comments of {}", item.key);
            fetch_with_timeout(
                timeout,
                &what,
                self.source.get_comments_since(&item.key, comment_offset),
            )
            .await?
        };

        let history = merged_history(&item.history, &new_events);
        let item_overrides = overrides::get(self.store.pool()?, &item.key).await?;
        let roles = self.directory.snapshot().await?;
        let children = self.children(&item.key).await?;

        let derived = derive_issue(&IssueInputs {
            key: &item.key,
            history: &history,
            snapshot: &item.snapshot,
            overrides: &item_overrides,
            previous: &item.derived,
            children: &children,
            roles: &roles,
            settings: &self.settings,
        })?;

        // A defect child changes its parent's attribution
        let mut cascade = Vec::new();
        if let Some(parent) = item.snapshot.parent_key.as_deref() {
            let before = ChildItem::from_item(&item, &item_overrides);
            let after =
                ChildItem::from_parts(&item.key, &item.snapshot, &derived, &item_overrides);
            let is_defect = self.settings.is_defect_title(&after.title);
            if is_defect && (before != after || !skip_history) {
                debug!(key = %item.key, parent, "Defect child changed, recomputing parent");
                cascade.push(parent.to_string());
            }
        }

        debug!(
            key = %item.key,
            new_events = new_events.len(),
            new_comments = new_comments.len(),
            "Issue derived"
        );

        Ok(ProcessedItem {
            new_events,
            new_comments,
            derived,
            links: None,
            cascade,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_restarts_from_zero() {
        let mut item = WorkItem {
            id: 1,
            key: "KEY-1".into(),
            kind: ItemKind::Issue,
            scope: "KEY".into(),
            raw: serde_json::json!({}),
            snapshot: Default::default(),
            history: Vec::new(),
            comments: Vec::new(),
            sync_status: crate::models::SyncStatus::Pending,
            sync_params: SyncParams::full(),
            derived: Default::default(),
            links: Default::default(),
            pending_requests: Vec::new(),
            revision: 1,
            last_sync_at: None,
        };
        item.history.push(crate::models::HistoryEvent {
            id: "1".into(),
            actor: None,
            at: 1,
            changes: Vec::new(),
            activity: None,
        });
        assert_eq!(offsets(&item), (1, 0));

        item.sync_params.refresh_history = true;
        assert_eq!(offsets(&item), (0, 0));
    }
}
