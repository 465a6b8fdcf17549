//! Change request workflow records
//!
//! PENDING → APPROVED | REJECTED | CANCELLED, all terminal.

use serde::{Deserialize, Serialize};

/// Kind of correction a request proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestType {
    PointChange,
    LinkedIssueChange,
    InvalidateEvent,
}

impl ChangeRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeRequestType::PointChange => "POINT_CHANGE",
            ChangeRequestType::LinkedIssueChange => "LINKED_ISSUE_CHANGE",
            ChangeRequestType::InvalidateEvent => "INVALIDATE_EVENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "POINT_CHANGE" => Some(ChangeRequestType::PointChange),
            "LINKED_ISSUE_CHANGE" => Some(ChangeRequestType::LinkedIssueChange),
            "INVALIDATE_EVENT" => Some(ChangeRequestType::InvalidateEvent),
            _ => None,
        }
    }
}

/// Persisted request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeRequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ChangeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeRequestStatus::Pending => "PENDING",
            ChangeRequestStatus::Approved => "APPROVED",
            ChangeRequestStatus::Rejected => "REJECTED",
            ChangeRequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ChangeRequestStatus::Pending),
            "APPROVED" => Some(ChangeRequestStatus::Approved),
            "REJECTED" => Some(ChangeRequestStatus::Rejected),
            "CANCELLED" => Some(ChangeRequestStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeRequestStatus::Pending)
    }
}

/// Proposed change as submitted by the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposedChange {
    PointChange { new_points: i64 },
    LinkedIssueChange { new_linked_key: String },
    InvalidateEvent { event_id: String },
}

impl ProposedChange {
    pub fn request_type(&self) -> ChangeRequestType {
        match self {
            ProposedChange::PointChange { .. } => ChangeRequestType::PointChange,
            ProposedChange::LinkedIssueChange { .. } => ChangeRequestType::LinkedIssueChange,
            ProposedChange::InvalidateEvent { .. } => ChangeRequestType::InvalidateEvent,
        }
    }
}

/// Stored request data: the proposal plus the pre-change snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestData {
    PointChange {
        new_points: i64,
        old_points: Option<i64>,
    },
    LinkedIssueChange {
        new_linked_key: String,
        old_linked_key: Option<String>,
    },
    InvalidateEvent {
        event_id: String,
    },
}

impl ChangeRequestData {
    pub fn request_type(&self) -> ChangeRequestType {
        match self {
            ChangeRequestData::PointChange { .. } => ChangeRequestType::PointChange,
            ChangeRequestData::LinkedIssueChange { .. } => ChangeRequestType::LinkedIssueChange,
            ChangeRequestData::InvalidateEvent { .. } => ChangeRequestType::InvalidateEvent,
        }
    }
}

/// Caller identity passed in by the routing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: true,
        }
    }
}

/// Stored change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: String,
    pub request_type: ChangeRequestType,
    pub target_key: String,
    pub data: ChangeRequestData,
    /// Generated summary of the change
    pub description: String,
    /// Requester's reason for the change
    pub justification: String,
    pub status: ChangeRequestStatus,
    pub requester_id: String,
    pub processed_by: Option<String>,
    pub processed_at: Option<i64>,
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
