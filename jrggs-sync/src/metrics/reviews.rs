//! Code-review and rejection events

use std::collections::HashMap;

use crate::directory::RoleLookup;
use crate::models::{CodeReview, HistoryEvent, Override, Rejection};
use crate::settings::{EngineSettings, UNKNOWN_CONTRIBUTOR};

/// Transitions into the review family by contributors with a reviewer role
pub fn code_reviews(
    history: &[HistoryEvent],
    overrides: &Override,
    roles: &dyn RoleLookup,
    settings: &EngineSettings,
) -> Vec<CodeReview> {
    history
        .iter()
        .filter_map(|event| {
            let actor = event.actor.as_deref()?;
            let status = event.status_to()?;
            if !settings.review_statuses.contains(status) || !roles.is_reviewer(actor) {
                return None;
            }
            Some(CodeReview {
                event_id: event.id.clone(),
                actor: actor.to_string(),
                at: event.at,
                active: !overrides.is_invalidated(&event.id),
            })
        })
        .collect()
}

/// Attribute each transition into the rejected family to the last reviewer
///
/// The last reviewer is the actor of the most recent active code review
/// since the previous rejection.
pub fn rejections(
    history: &[HistoryEvent],
    reviews: &[CodeReview],
    overrides: &Override,
    settings: &EngineSettings,
) -> Vec<Rejection> {
    let by_event: HashMap<&str, &CodeReview> =
        reviews.iter().map(|r| (r.event_id.as_str(), r)).collect();
    let mut result = Vec::new();
    let mut last_reviewer: Option<&str> = None;

    for event in history {
        if let Some(review) = by_event.get(event.id.as_str()) {
            if review.active {
                last_reviewer = Some(review.actor.as_str());
            }
            continue;
        }

        let Some(status) = event.status_to() else {
            continue;
        };
        if !settings.rejected_statuses.contains(status) {
            continue;
        }

        result.push(Rejection {
            event_id: event.id.clone(),
            actor: last_reviewer.unwrap_or(UNKNOWN_CONTRIBUTOR).to_string(),
            rejected_by: event.actor.clone(),
            at: event.at,
            active: !overrides.is_invalidated(&event.id),
        });
        last_reviewer = None;
    }

    result
}
