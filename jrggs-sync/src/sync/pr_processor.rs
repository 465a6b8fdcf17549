//! Pull-request processing step
//!
//! Pull requests get review aggregates instead of issue metrics, plus the
//! links to the issues they mention. A link change cascades a light
//! recompute to every issue that gained or lost the link.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{fetch_with_timeout, ItemProcessor, ProcessedItem};
use crate::db::items::{merged_comments, merged_history};
use crate::db::{overrides, Store};
use crate::error::SyncResult;
use crate::linking::{cascade_targets, resolve_links, LinkExtractor};
use crate::metrics::pull_request_data;
use crate::models::{Activity, Comment, DerivedFields, HistoryEvent, ItemKind, WorkItem};
use crate::settings::EngineSettings;
use crate::source::SourceAdapter;

pub struct PullRequestProcessor {
    store: Store,
    source: Arc<dyn SourceAdapter>,
    links: LinkExtractor,
    settings: Arc<EngineSettings>,
}

impl PullRequestProcessor {
    pub fn new(
        store: Store,
        source: Arc<dyn SourceAdapter>,
        links: LinkExtractor,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            source,
            links,
            settings,
        }
    }
}

/// Title, comment activity bodies and comments, in that order
fn link_texts<'a>(
    title: Option<&'a str>,
    history: &'a [HistoryEvent],
    comments: &'a [Comment],
) -> Vec<&'a str> {
    let activity_bodies = history.iter().filter_map(|e| match &e.activity {
        Some(Activity::Comment { body }) => Some(body.as_str()),
        _ => None,
    });
    title
        .into_iter()
        .chain(activity_bodies)
        .chain(comments.iter().map(|c| c.body.as_str()))
        .collect()
}

#[async_trait]
impl ItemProcessor for PullRequestProcessor {
    fn kind(&self) -> ItemKind {
        ItemKind::PullRequest
    }

    async fn process(&self, item: WorkItem) -> SyncResult<ProcessedItem> {
        let params = item.sync_params;
        let timeout = self.settings.fetch_timeout();

        let new_events = if params.skip_history {
            Vec::new()
        } else {
            let offset = if params.refresh_history { 0 } else { item.history.len() };
            let what = format!("activity of {}", item.key);
            fetch_with_timeout(timeout, &what, self.source.get_events_since(&item.key, offset))
                .await?
        };
        let new_comments = if params.skip_comments {
            Vec::new()
        } else {
            let offset = if params.refresh_history { 0 } else { item.comments.len() };
            let what = format!("comments of {}", item.key);
            fetch_with_timeout(timeout, &what, self.source.get_comments_since(&item.key, offset))
                .await?
        };

        let history = merged_history(&item.history, &new_events);
        let comments = merged_comments(&item.comments, &new_comments);
        let item_overrides = overrides::get(self.store.pool()?, &item.key).await?;

        let data = pull_request_data(&history, &item.snapshot, &item_overrides, &self.settings);

        let discovered = self.links.extract(link_texts(
            item.snapshot.title.as_deref(),
            &history,
            &comments,
        ));
        let links = resolve_links(&item.links, &discovered);
        let cascade = cascade_targets(&item.links, &links);
        if !cascade.is_empty() {
            debug!(key = %item.key, targets = ?cascade, "Pull request links changed");
        }

        let derived = DerivedFields {
            pull_request: Some(data),
            ..Default::default()
        };

        Ok(ProcessedItem {
            new_events,
            new_comments,
            derived,
            links: Some(links),
            cascade,
        })
    }
}
