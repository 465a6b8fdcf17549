//! Work item document
//!
//! A work item is one tracked issue or pull request. Ingestion creates it,
//! the processing queue derives fields from its history, and approved
//! change requests feed corrections back in by resetting it to PENDING.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of tracked work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    /// Jira-style issue, derived from its changelog
    Issue,
    /// Pull request, derived from its activity log
    PullRequest,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Issue => "ISSUE",
            ItemKind::PullRequest => "PULL_REQUEST",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ISSUE" => Some(ItemKind::Issue),
            "PULL_REQUEST" => Some(ItemKind::PullRequest),
            _ => None,
        }
    }
}

/// Persisted sync status
///
/// Stored values are stable: `PENDING`, `SUCCESS`, `FAILED`. There is no
/// persisted in-progress state; an item being processed stays PENDING until
/// its batch commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Pending,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(SyncStatus::Pending),
            "SUCCESS" => Some(SyncStatus::Success),
            "FAILED" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Hints for the next processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncParams {
    /// Do not fetch new history events, recompute from stored history
    pub skip_history: bool,
    /// Do not fetch new comments
    pub skip_comments: bool,
    /// Refetch the history from offset zero (deduplicated by event id)
    pub refresh_history: bool,
}

impl SyncParams {
    /// Full incremental pass
    pub fn full() -> Self {
        Self::default()
    }

    /// Recompute only; used for cascades and workflow markings
    pub fn light() -> Self {
        Self {
            skip_history: true,
            skip_comments: true,
            refresh_history: false,
        }
    }

    /// Combine with hints left by an earlier, still unprocessed marking
    ///
    /// A light marking never downgrades a pending full pass.
    pub fn combine(self, pending: SyncParams) -> Self {
        Self {
            skip_history: self.skip_history && pending.skip_history,
            skip_comments: self.skip_comments && pending.skip_comments,
            refresh_history: self.refresh_history || pending.refresh_history,
        }
    }
}

/// One field transition inside a history event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldChange {
    pub field: String,
    pub from_id: Option<String>,
    pub from_text: Option<String>,
    pub to_id: Option<String>,
    pub to_text: Option<String>,
}

/// Review activity recorded on pull requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Comment { body: String },
    Approval,
    /// Changes requested or declined
    Decline,
    /// Any other activity entry, kept for offsets
    Other,
}

/// Timestamped, attributed entry in an item's append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Source-assigned id, unique within the item
    pub id: String,
    /// Account id of the actor, if known
    #[serde(default)]
    pub actor: Option<String>,
    /// Event time (epoch millis)
    pub at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl HistoryEvent {
    /// Target status name if this event changes the status field
    pub fn status_to(&self) -> Option<&str> {
        self.changes
            .iter()
            .find(|c| c.field.eq_ignore_ascii_case("status"))
            .and_then(|c| c.to_text.as_deref())
    }

    /// Sprint change carried by this event, if any
    pub fn sprint_change(&self) -> Option<&FieldChange> {
        self.changes
            .iter()
            .find(|c| c.field.eq_ignore_ascii_case("sprint"))
    }
}

/// Comment attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    pub at: i64,
    #[serde(default)]
    pub body: String,
}

/// Sprint reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Typed view over the raw source payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSnapshot {
    pub title: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub author: Option<String>,
    pub story_points: Option<i64>,
    pub parent_key: Option<String>,
    pub sprint: Option<SprintRef>,
    /// Pull-request state (OPEN, MERGED, DECLINED)
    pub state: Option<String>,
    /// Source update time (epoch millis)
    pub updated_at: i64,
}

/// Per-user derived counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserMetrics {
    pub story_points: i64,
    pub n_rejections: u32,
    pub n_code_reviews: u32,
    pub n_defects: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InCharge {
    pub actor: String,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReview {
    pub event_id: String,
    pub actor: String,
    pub at: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub event_id: String,
    /// Reviewer the rejection is attributed to
    pub actor: String,
    /// Actor who moved the item into the rejected status
    #[serde(default)]
    pub rejected_by: Option<String>,
    pub at: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectAttribution {
    pub child_key: String,
    pub actor: String,
    pub active: bool,
}

/// Pull-request review aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestData {
    pub total_comments: u32,
    pub total_approvals: u32,
    pub total_declines: u32,
    pub approvers: Vec<String>,
    pub decliners: Vec<String>,
    pub first_review_at: Option<i64>,
    pub comment_counts: BTreeMap<String, u32>,
    pub person_in_charge: Option<String>,
    pub points: i64,
}

/// Fields written by the derivation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivedFields {
    pub metrics: BTreeMap<String, UserMetrics>,
    pub in_charge: Vec<InCharge>,
    pub code_reviews: Vec<CodeReview>,
    pub rejections: Vec<Rejection>,
    pub defects: Vec<DefectAttribution>,
    pub story_points: BTreeMap<String, i64>,
    pub sprint_ids: Vec<i64>,
    pub completed_at: Option<i64>,
    pub completed_sprint: Option<SprintRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestData>,
}

/// Cross-entity links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemLinks {
    pub active_key: Option<String>,
    pub linked_keys: Vec<String>,
}

/// Tracked work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Insertion order, used for oldest-first claiming
    pub id: i64,
    pub key: String,
    pub kind: ItemKind,
    pub scope: String,
    pub raw: serde_json::Value,
    pub snapshot: ItemSnapshot,
    pub history: Vec<HistoryEvent>,
    pub comments: Vec<Comment>,
    pub sync_status: SyncStatus,
    pub sync_params: SyncParams,
    pub derived: DerivedFields,
    pub links: ItemLinks,
    pub pending_requests: Vec<String>,
    /// Bumped by every external PENDING marking
    pub revision: i64,
    pub last_sync_at: Option<i64>,
}
