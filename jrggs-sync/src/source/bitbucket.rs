//! Bitbucket pull-request source
//!
//! Pull requests are keyed `{workspace}/{repo_slug}#{id}`. Activity comes
//! back newest first; it is reversed so offsets count from the oldest entry.
//! Comments are part of the activity log, so `get_comments_since` is empty.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jrggs_common::config::BitbucketConfig;
use jrggs_common::time::parse_millis;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{check_status, str_at, SourceAdapter, SourceError, SourceItem, SourcePage};
use crate::models::{Activity, Comment, FieldChange, HistoryEvent, ItemKind, ItemSnapshot};

/// Upper bound on activity pages per pull request
const MAX_ACTIVITY_PAGES: usize = 50;

/// Bitbucket Cloud REST client
pub struct BitbucketSource {
    http_client: reqwest::Client,
    api_base: String,
    username: String,
    api_token: String,
    workspace: String,
    repo_slug: String,
}

#[derive(Debug, Deserialize)]
struct Paged {
    #[serde(default)]
    values: Vec<Value>,
    next: Option<String>,
}

impl BitbucketSource {
    pub fn new(config: &BitbucketConfig, timeout: Duration) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_token: config.api_token.clone(),
            workspace: config.workspace.clone(),
            repo_slug: config.repo_slug.clone(),
        })
    }

    fn repository_url(&self) -> String {
        format!(
            "{}/repositories/{}/{}",
            self.api_base, self.workspace, self.repo_slug
        )
    }

    /// Work item key of pull request `id`
    pub fn item_key(&self, id: i64) -> String {
        format!("{}/{}#{}", self.workspace, self.repo_slug, id)
    }

    fn pull_request_id(&self, key: &str) -> Result<i64, SourceError> {
        key.rsplit_once('#')
            .and_then(|(_, id)| id.parse().ok())
            .ok_or_else(|| SourceError::Parse(format!("Not a pull-request key: {}", key)))
    }

    async fn get_page(&self, url: &str, query: &[(&str, String)]) -> Result<Paged, SourceError> {
        tracing::debug!(url = %url, "Querying Bitbucket API");

        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Typed view over a pull-request payload
    pub fn snapshot(pr: &Value) -> ItemSnapshot {
        ItemSnapshot {
            title: str_at(pr, "/title").map(str::to_string),
            status: str_at(pr, "/state").map(str::to_string),
            assignee: None,
            author: str_at(pr, "/author/account_id").map(str::to_string),
            story_points: None,
            parent_key: None,
            sprint: None,
            state: str_at(pr, "/state").map(str::to_string),
            updated_at: str_at(pr, "/updated_on").and_then(parse_millis).unwrap_or(0),
        }
    }
}

/// Convert one activity entry; `None` for entries without a usable time
pub(crate) fn activity_to_event(entry: &Value) -> Option<HistoryEvent> {
    if let Some(comment) = entry.get("comment") {
        let at = str_at(comment, "/created_on").and_then(parse_millis)?;
        let id = comment
            .get("id")
            .map(|id| id.to_string())
            .unwrap_or_else(|| at.to_string());
        return Some(HistoryEvent {
            id: format!("comment:{}", id),
            actor: str_at(comment, "/user/account_id").map(str::to_string),
            at,
            changes: Vec::new(),
            activity: Some(Activity::Comment {
                body: str_at(comment, "/content/raw").unwrap_or_default().to_string(),
            }),
        });
    }

    if let Some(approval) = entry.get("approval") {
        let at = str_at(approval, "/date").and_then(parse_millis)?;
        let actor = str_at(approval, "/user/account_id").map(str::to_string);
        return Some(HistoryEvent {
            id: format!("approval:{}:{}", actor.as_deref().unwrap_or("-"), at),
            actor,
            at,
            changes: Vec::new(),
            activity: Some(Activity::Approval),
        });
    }

    if let Some(update) = entry.get("update") {
        let at = str_at(update, "/date").and_then(parse_millis)?;
        let state = str_at(update, "/state").unwrap_or_default();
        let actor = str_at(update, "/author/account_id").map(str::to_string);
        let activity = match state {
            "CHANGES_REQUESTED" | "DECLINED" => Activity::Decline,
            _ => Activity::Other,
        };
        return Some(HistoryEvent {
            id: format!("update:{}:{}:{}", actor.as_deref().unwrap_or("-"), at, state),
            actor,
            at,
            changes: vec![FieldChange {
                field: "state".to_string(),
                to_text: Some(state.to_string()),
                ..Default::default()
            }],
            activity: Some(activity),
        });
    }

    None
}

#[async_trait]
impl SourceAdapter for BitbucketSource {
    fn kind(&self) -> ItemKind {
        ItemKind::PullRequest
    }

    fn scope(&self) -> String {
        format!("{}/{}", self.workspace, self.repo_slug)
    }

    fn lists_newest_first(&self) -> bool {
        true
    }

    async fn list_updated_since(
        &self,
        scope: &str,
        watermark: i64,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let page = match cursor {
            Some(next_url) => self.get_page(next_url, &[]).await?,
            None => {
                let since = Utc
                    .timestamp_millis_opt(watermark)
                    .single()
                    .unwrap_or_default()
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                let url = format!("{}/pullrequests", self.repository_url());
                self.get_page(
                    &url,
                    &[
                        ("state", "ALL".to_string()),
                        ("sort", "-updated_on".to_string()),
                        ("q", format!("updated_on >= \"{}\"", since)),
                        ("pagelen", page_size.to_string()),
                    ],
                )
                .await?
            }
        };

        let items = page
            .values
            .into_iter()
            .map(|pr| {
                let id = pr
                    .get("id")
                    .and_then(|id| id.as_i64())
                    .ok_or_else(|| SourceError::Parse("Pull request without id".to_string()))?;
                let snapshot = Self::snapshot(&pr);
                Ok(SourceItem {
                    key: self.item_key(id),
                    updated_at: snapshot.updated_at,
                    snapshot,
                    raw: pr,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        tracing::debug!(scope, fetched = items.len(), "Fetched pull-request page");
        Ok(SourcePage {
            items,
            next: page.next,
        })
    }

    async fn get_events_since(&self, key: &str, offset: usize) -> Result<Vec<HistoryEvent>, SourceError> {
        let id = self.pull_request_id(key)?;
        let mut url = format!("{}/pullrequests/{}/activity", self.repository_url(), id);
        let mut entries = Vec::new();

        for page_no in 1..=MAX_ACTIVITY_PAGES {
            let page = self.get_page(&url, &[]).await?;
            let fetched = page.values.len();
            entries.extend(page.values);

            match page.next {
                Some(next) if fetched > 0 => url = next,
                _ => break,
            }
            if page_no == MAX_ACTIVITY_PAGES {
                tracing::warn!(key, "Activity page limit reached");
            }
        }

        // Newest first from the API
        entries.reverse();
        Ok(entries
            .iter()
            .filter_map(activity_to_event)
            .skip(offset)
            .collect())
    }

    async fn get_comments_since(&self, _key: &str, _offset: usize) -> Result<Vec<Comment>, SourceError> {
        Ok(Vec::new())
    }
}
