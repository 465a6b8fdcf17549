//! Jira issue source
//!
//! Issues are listed newest first with JQL; changelog and comments are paged
//! with `startAt`, which lines up with the stored entry count.
//!
//! JQL reads absolute date literals in the Jira user's time zone, so the
//! lower bound is sent as a relative offset in minutes instead. It is
//! rounded up, and ingestion drops anything older than the exact watermark.

use async_trait::async_trait;
use jrggs_common::config::JiraConfig;
use jrggs_common::time::{now_millis, parse_millis};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{check_status, str_at, SourceAdapter, SourceError, SourceItem, SourcePage};
use crate::models::{Comment, FieldChange, HistoryEvent, ItemKind, ItemSnapshot, SprintRef};

/// Custom field holding story points
pub const DEFAULT_STORY_POINTS_FIELD: &str = "customfield_10033";
/// Custom field holding the sprint list
pub const DEFAULT_SPRINT_FIELD: &str = "customfield_10580";
/// Page size for changelog and comment requests
const DETAIL_PAGE_SIZE: usize = 100;
/// Upper bound on changelog/comment pages per item
const MAX_DETAIL_PAGES: usize = 50;

/// Jira REST client
pub struct JiraSource {
    http_client: reqwest::Client,
    host: String,
    token: String,
    project_key: String,
    story_points_field: String,
    sprint_field: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default, rename = "startAt")]
    start_at: usize,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct ChangelogResponse {
    #[serde(default)]
    values: Vec<ChangelogRecord>,
    #[serde(default, rename = "isLast")]
    is_last: bool,
}

#[derive(Debug, Deserialize)]
struct ChangelogRecord {
    id: String,
    #[serde(default)]
    author: Option<Value>,
    created: String,
    #[serde(default)]
    items: Vec<ChangelogItem>,
}

#[derive(Debug, Deserialize)]
struct ChangelogItem {
    #[serde(default)]
    field: String,
    from: Option<String>,
    #[serde(rename = "fromString")]
    from_string: Option<String>,
    to: Option<String>,
    #[serde(rename = "toString")]
    to_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentsResponse {
    #[serde(default)]
    comments: Vec<CommentRecord>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct CommentRecord {
    id: String,
    #[serde(default)]
    author: Option<Value>,
    created: String,
    #[serde(default)]
    body: Value,
}

impl JiraSource {
    pub fn new(config: &JiraConfig, timeout: Duration) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            host: config.host.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            project_key: config.project_key.clone(),
            story_points_field: DEFAULT_STORY_POINTS_FIELD.to_string(),
            sprint_field: DEFAULT_SPRINT_FIELD.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.host, path);
        tracing::debug!(url = %url, "Querying Jira API");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", &self.token)
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

    /// Typed view over an issue payload
    pub fn snapshot(&self, issue: &Value) -> ItemSnapshot {
        let fields = issue.get("fields").cloned().unwrap_or(Value::Null);

        // Current sprint is the one with the highest id
        let sprint = fields
            .get(&self.sprint_field)
            .and_then(|s| s.as_array())
            .and_then(|sprints| {
                sprints
                    .iter()
                    .filter_map(|s| {
                        Some(SprintRef {
                            id: s.get("id")?.as_i64()?,
                            name: s.get("name").and_then(|n| n.as_str()).map(str::to_string),
                        })
                    })
                    .max_by_key(|s| s.id)
            });

        ItemSnapshot {
            title: str_at(&fields, "/summary").map(str::to_string),
            status: str_at(&fields, "/status/name").map(str::to_string),
            assignee: str_at(&fields, "/assignee/accountId").map(str::to_string),
            author: str_at(&fields, "/reporter/accountId").map(str::to_string),
            story_points: fields
                .get(&self.story_points_field)
                .and_then(|p| p.as_f64())
                .map(|p| p.round() as i64),
            parent_key: str_at(&fields, "/parent/key").map(str::to_string),
            sprint,
            state: None,
            updated_at: str_at(&fields, "/updated").and_then(parse_millis).unwrap_or(0),
        }
    }
}

/// Relative JQL lower bound covering `watermark`, e.g. `-5m`
///
/// `None` when there is no watermark yet and everything is wanted.
fn updated_since(watermark: i64, now: i64) -> Option<String> {
    if watermark <= 0 {
        return None;
    }
    let elapsed = (now - watermark).max(0);
    // Round up and add a minute for clock skew between us and Jira
    let minutes = (elapsed + 59_999) / 60_000 + 1;
    Some(format!("-{}m", minutes))
}

fn account_id(author: &Option<Value>) -> Option<String> {
    author
        .as_ref()
        .and_then(|a| a.get("accountId"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

fn to_event(record: ChangelogRecord) -> Result<HistoryEvent, SourceError> {
    let at = parse_millis(&record.created).ok_or_else(|| {
        SourceError::Parse(format!("Changelog {} has invalid time {}", record.id, record.created))
    })?;

    Ok(HistoryEvent {
        actor: account_id(&record.author),
        id: record.id,
        at,
        changes: record
            .items
            .into_iter()
            .map(|item| FieldChange {
                field: item.field,
                from_id: item.from,
                from_text: item.from_string,
                to_id: item.to,
                to_text: item.to_string,
            })
            .collect(),
        activity: None,
    })
}

fn to_comment(record: CommentRecord) -> Result<Comment, SourceError> {
    let at = parse_millis(&record.created).ok_or_else(|| {
        SourceError::Parse(format!("Comment {} has invalid time {}", record.id, record.created))
    })?;

    // API v2 returns plain text, v3 returns a document tree
    let body = match &record.body {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(Comment {
        author: account_id(&record.author),
        id: record.id,
        at,
        body,
    })
}

#[async_trait]
impl SourceAdapter for JiraSource {
    fn kind(&self) -> ItemKind {
        ItemKind::Issue
    }

    fn scope(&self) -> String {
        self.project_key.clone()
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
        let start_at: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let jql = match updated_since(watermark, now_millis()) {
            Some(bound) => format!(
                "project = \"{}\" AND updated >= \"{}\" ORDER BY updated DESC",
                scope, bound
            ),
            None => format!("project = \"{}\" ORDER BY updated DESC", scope),
        };

        let response: SearchResponse = self
            .get_json(
                "/rest/api/2/search",
                &[
                    ("jql", jql),
                    ("startAt", start_at.to_string()),
                    ("maxResults", page_size.to_string()),
                ],
            )
            .await?;

        let fetched = response.issues.len();
        let items = response
            .issues
            .into_iter()
            .map(|issue| {
                let key = str_at(&issue, "/key")
                    .ok_or_else(|| SourceError::Parse("Issue without key".to_string()))?
                    .to_string();
                let snapshot = self.snapshot(&issue);
                Ok(SourceItem {
                    key,
                    updated_at: snapshot.updated_at,
                    snapshot,
                    raw: issue,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        let consumed = response.start_at + fetched;
        let next = (fetched > 0 && consumed < response.total).then(|| consumed.to_string());

        tracing::debug!(scope, fetched, total = response.total, "Fetched Jira issue page");
        Ok(SourcePage { items, next })
    }

    async fn get_events_since(&self, key: &str, offset: usize) -> Result<Vec<HistoryEvent>, SourceError> {
        let path = format!("/rest/api/2/issue/{}/changelog", key);
        let mut events = Vec::new();
        let mut start_at = offset;

        for _ in 0..MAX_DETAIL_PAGES {
            let page: ChangelogResponse = self
                .get_json(
                    &path,
                    &[
                        ("startAt", start_at.to_string()),
                        ("maxResults", DETAIL_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let fetched = page.values.len();
            for record in page.values {
                events.push(to_event(record)?);
            }
            start_at += fetched;

            if page.is_last || fetched == 0 {
                return Ok(events);
            }
        }

        tracing::warn!(key, "Changelog page limit reached");
        Ok(events)
    }

    async fn get_comments_since(&self, key: &str, offset: usize) -> Result<Vec<Comment>, SourceError> {
        let path = format!("/rest/api/2/issue/{}/comment", key);
        let mut comments = Vec::new();
        let mut start_at = offset;

        for _ in 0..MAX_DETAIL_PAGES {
            let page: CommentsResponse = self
                .get_json(
                    &path,
                    &[
                        ("startAt", start_at.to_string()),
                        ("maxResults", DETAIL_PAGE_SIZE.to_string()),
                        ("orderBy", "created".to_string()),
                    ],
                )
                .await?;

            let fetched = page.comments.len();
            for record in page.comments {
                comments.push(to_comment(record)?);
            }
            start_at += fetched;

            if fetched == 0 || start_at >= page.total {
                return Ok(comments);
            }
        }

        tracing::warn!(key, "Comment page limit reached");
        Ok(comments)
    }
}
