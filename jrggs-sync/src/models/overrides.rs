//! Manual corrections layered on top of derived fields
//!
//! Overrides are keyed by item key and mutated only by direct admin edits or
//! approved change requests. The queue re-reads them before every derivation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Admin overrides of pull-request counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountOverrides {
    pub total_comments: Option<u32>,
    pub total_approvals: Option<u32>,
    pub total_declines: Option<u32>,
}

impl CountOverrides {
    pub fn is_empty(&self) -> bool {
        self.total_comments.is_none()
            && self.total_approvals.is_none()
            && self.total_declines.is_none()
    }
}

/// Override document for one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Override {
    pub key: String,
    /// Events suppressed from every derivation
    pub invalidated_event_ids: BTreeSet<String>,
    /// Explicit story-point distribution, used verbatim when non-empty
    pub story_points: BTreeMap<String, i64>,
    /// Forced point total (pull-request points for PRs)
    pub points: Option<i64>,
    /// Excluded items are skipped as defect children
    pub excluded: bool,
    /// Account whose comments are not counted on a pull request
    pub owner_account: Option<String>,
    /// Replaces the pull-request author as person in charge
    pub person_in_charge: Option<String>,
    pub counts: CountOverrides,
}

impl Override {
    pub fn empty(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn is_invalidated(&self, event_id: &str) -> bool {
        self.invalidated_event_ids.contains(event_id)
    }

    /// Apply a single-field patch
    pub fn apply(&mut self, patch: OverridePatch) {
        match patch {
            OverridePatch::StoryPoints(points) => {
                self.story_points = points.into_iter().filter(|(_, p)| *p > 0).collect();
            }
            OverridePatch::Points(points) => self.points = points,
            OverridePatch::Excluded(excluded) => self.excluded = excluded,
            OverridePatch::OwnerAccount(account) => self.owner_account = account,
            OverridePatch::PersonInCharge(account) => self.person_in_charge = account,
            OverridePatch::InvalidateEvent(event_id) => {
                self.invalidated_event_ids.insert(event_id);
            }
            OverridePatch::RestoreEvent(event_id) => {
                self.invalidated_event_ids.remove(&event_id);
            }
            OverridePatch::Counts(counts) => self.counts = counts,
        }
    }
}

/// Admin edit of one override field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum OverridePatch {
    StoryPoints(BTreeMap<String, i64>),
    Points(Option<i64>),
    Excluded(bool),
    OwnerAccount(Option<String>),
    PersonInCharge(Option<String>),
    InvalidateEvent(String),
    RestoreEvent(String),
    Counts(CountOverrides),
}
