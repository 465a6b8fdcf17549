//! Defect attribution from child items

use crate::models::{DefectAttribution, DerivedFields, ItemSnapshot, Override, WorkItem};
use crate::settings::{EngineSettings, UNKNOWN_CONTRIBUTOR};

/// What the derivation needs to know about one child item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildItem {
    pub key: String,
    pub title: String,
    pub excluded: bool,
    /// First active code reviewer recorded on the child
    pub first_reviewer: Option<String>,
}

impl ChildItem {
    pub fn from_item(item: &WorkItem, overrides: &Override) -> Self {
        Self::from_parts(&item.key, &item.snapshot, &item.derived, overrides)
    }

    /// Build from a child's parts, e.g. derived fields not yet stored
    pub fn from_parts(
        key: &str,
        snapshot: &ItemSnapshot,
        derived: &DerivedFields,
        overrides: &Override,
    ) -> Self {
        Self {
            key: key.to_string(),
            title: snapshot.title.clone().unwrap_or_default(),
            excluded: overrides.excluded,
            first_reviewer: derived
                .code_reviews
                .iter()
                .filter(|r| r.active)
                .min_by_key(|r| r.at)
                .map(|r| r.actor.clone()),
        }
    }
}

/// Children with the defect marker, attributed to their first reviewer
///
/// The child key plays the part of an event id: a defect is inactive when
/// the parent's override invalidates it, which is what an approved
/// INVALIDATE_EVENT request naming the child does. Children excluded by
/// their own override are skipped entirely.
pub fn defects(
    children: &[ChildItem],
    overrides: &Override,
    settings: &EngineSettings,
) -> Vec<DefectAttribution> {
    let mut result: Vec<DefectAttribution> = children
        .iter()
        .filter(|child| !child.excluded && settings.is_defect_title(&child.title))
        .map(|child| DefectAttribution {
            child_key: child.key.clone(),
            actor: child
                .first_reviewer
                .clone()
                .unwrap_or_else(|| UNKNOWN_CONTRIBUTOR.to_string()),
            active: !overrides.is_invalidated(&child.key),
        })
        .collect();
    result.sort_by(|a, b| a.child_key.cmp(&b.child_key));
    result
}
