//! Change request workflow
//!
//! Users propose corrections to derived data; admins approve or reject
//! them. Creating a request and every terminal transition re-arm the
//! target's queue with a light recompute, so the pending-request list on
//! the item stays current.
//!
//! On approval the side effects are written first and the request is
//! marked APPROVED last. If a side effect fails the request stays PENDING
//! and the error goes back to the caller.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use jrggs_common::events::{EventBus, SyncEvent};
use jrggs_common::time::now_millis;

use crate::db::{change_requests, items, overrides, Store};
use crate::error::{SyncError, SyncResult};
use crate::linking::LinkExtractor;
use crate::models::{
    Actor, ChangeRequest, ChangeRequestData, ChangeRequestStatus, ItemKind, ItemLinks,
    ProposedChange, SyncParams, WorkItem,
};
use crate::settings::EngineSettings;
use crate::sync::QueueSet;
use crate::utils::NamedLocks;

pub struct ChangeRequestService {
    store: Store,
    locks: NamedLocks,
    events: EventBus,
    queues: QueueSet,
    links: LinkExtractor,
    settings: Arc<EngineSettings>,
}

impl ChangeRequestService {
    pub fn new(
        store: Store,
        locks: NamedLocks,
        events: EventBus,
        queues: QueueSet,
        links: LinkExtractor,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            locks,
            events,
            queues,
            links,
            settings,
        }
    }

    pub async fn get(&self, id: &str) -> SyncResult<ChangeRequest> {
        change_requests::get(self.store.pool()?, id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Change request {}", id)))
    }

    pub async fn list(&self, status: ChangeRequestStatus) -> SyncResult<Vec<ChangeRequest>> {
        Ok(change_requests::list_by_status(self.store.pool()?, status).await?)
    }

    /// Open a request against `target_key`
    pub async fn create(
        &self,
        actor: &Actor,
        target_key: &str,
        change: ProposedChange,
        justification: &str,
    ) -> SyncResult<ChangeRequest> {
        if justification.trim().is_empty() {
            return Err(SyncError::Validation("Justification is required".to_string()));
        }

        let pool = self.store.pool()?;
        let target = items::get(pool, target_key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Work item {}", target_key)))?;

        let request_type = change.request_type();
        let (data, description) = self.snapshot(&target, change).await?;

        if change_requests::find_pending(pool, target_key, request_type)
            .await?
            .is_some()
        {
            return Err(SyncError::Validation(format!(
                "{} already has a pending {} request",
                target_key,
                request_type.as_str()
            )));
        }

        let now = now_millis();
        let request = ChangeRequest {
            id: Uuid::new_v4().to_string(),
            request_type,
            target_key: target_key.to_string(),
            data,
            description,
            justification: justification.trim().to_string(),
            status: ChangeRequestStatus::Pending,
            requester_id: actor.id.clone(),
            processed_by: None,
            processed_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = change_requests::insert(pool, &request).await {
            if e.is_unique_violation() {
                return Err(SyncError::Validation(format!(
                    "{} already has a pending {} request",
                    target_key,
                    request_type.as_str()
                )));
            }
            return Err(e.into());
        }

        if let Some(kind) = items::add_pending_request(pool, target_key, &request.id).await? {
            self.queues.wake(kind);
        }

        info!(
            request_id = %request.id,
            target = %target_key,
            request_type = request_type.as_str(),
            requester = %actor.id,
            "Change request created"
        );
        Ok(request)
    }

    /// Validate a proposal and capture the state it was made against
    async fn snapshot(
        &self,
        target: &WorkItem,
        change: ProposedChange,
    ) -> SyncResult<(ChangeRequestData, String)> {
        match change {
            ProposedChange::PointChange { new_points } => {
                if new_points < 0 {
                    return Err(SyncError::Validation(format!(
                        "Points must be >= 0, got {}",
                        new_points
                    )));
                }
                let current = overrides::get(self.store.pool()?, &target.key).await?;
                let old_points = current.points;
                let linked = if target.links.linked_keys.is_empty() {
                    "none".to_string()
                } else {
                    target.links.linked_keys.join(", ")
                };
                let description = format!(
                    "Change points for {} (linked to {}) from {} to {}",
                    target.key,
                    linked,
                    old_points.unwrap_or(0),
                    new_points
                );
                Ok((
                    ChangeRequestData::PointChange {
                        new_points,
                        old_points,
                    },
                    description,
                ))
            }
            ProposedChange::LinkedIssueChange { new_linked_key } => {
                if target.kind != ItemKind::PullRequest {
                    return Err(SyncError::Validation(format!(
                        "{} is not a pull request",
                        target.key
                    )));
                }
                let new_linked_key = new_linked_key.trim().to_uppercase();
                if !self.links.accepts(&new_linked_key) {
                    return Err(SyncError::Validation(format!(
                        "'{}' is not a valid issue key",
                        new_linked_key
                    )));
                }
                if items::get(self.store.pool()?, &new_linked_key).await?.is_none() {
                    return Err(SyncError::NotFound(format!("Issue {}", new_linked_key)));
                }

                let old_linked_key = target.links.active_key.clone();
                let description = format!(
                    "Change linked issue for {} from {} to {}",
                    target.key,
                    old_linked_key.as_deref().unwrap_or("none"),
                    new_linked_key
                );
                Ok((
                    ChangeRequestData::LinkedIssueChange {
                        new_linked_key,
                        old_linked_key,
                    },
                    description,
                ))
            }
            ProposedChange::InvalidateEvent { event_id } => {
                // Defects are invalidated by their child key
                let derived = &target.derived;
                let is_defect = derived.defects.iter().any(|d| d.child_key == event_id);
                if !is_defect && !target.history.iter().any(|e| e.id == event_id) {
                    return Err(SyncError::NotFound(format!(
                        "Event {} in {}",
                        event_id, target.key
                    )));
                }
                let referenced = is_defect
                    || derived.rejections.iter().any(|r| r.event_id == event_id)
                    || derived.code_reviews.iter().any(|r| r.event_id == event_id);
                if !referenced {
                    return Err(SyncError::Validation(format!(
                        "No rejection, code review or defect found for event {}",
                        event_id
                    )));
                }
                let description = format!("Invalidate event {} on {}", event_id, target.key);
                Ok((ChangeRequestData::InvalidateEvent { event_id }, description))
            }
        }
    }

    /// Withdraw a PENDING request; only its requester may do this
    pub async fn cancel(&self, actor: &Actor, id: &str) -> SyncResult<ChangeRequest> {
        let lock_key = format!("change-request:{}", id);
        self.locks
            .with_lock(&lock_key, || async {
                let request = self.pending(id).await?;
                if request.requester_id != actor.id {
                    return Err(SyncError::PermissionDenied(
                        "Only the requester can cancel a request".to_string(),
                    ));
                }
                self.finish(&request, ChangeRequestStatus::Cancelled, actor, None)
                    .await
            })
            .await
    }

    /// Refuse a PENDING request (admin only)
    pub async fn reject(&self, actor: &Actor, id: &str, reason: &str) -> SyncResult<ChangeRequest> {
        require_admin(actor, "reject")?;
        if reason.trim().is_empty() {
            return Err(SyncError::Validation("Rejection reason is required".to_string()));
        }

        let lock_key = format!("change-request:{}", id);
        self.locks
            .with_lock(&lock_key, || async {
                let request = self.pending(id).await?;
                self.finish(
                    &request,
                    ChangeRequestStatus::Rejected,
                    actor,
                    Some(reason.trim()),
                )
                .await
            })
            .await
    }

    /// Apply a PENDING request's effect, then mark it APPROVED (admin only)
    pub async fn approve(&self, actor: &Actor, id: &str) -> SyncResult<ChangeRequest> {
        require_admin(actor, "approve")?;

        let lock_key = format!("change-request:{}", id);
        self.locks
            .with_lock(&lock_key, || async {
                let request = self.pending(id).await?;
                self.apply_effect(&request).await?;
                self.finish(&request, ChangeRequestStatus::Approved, actor, None)
                    .await
            })
            .await
    }

    async fn pending(&self, id: &str) -> SyncResult<ChangeRequest> {
        let request = self.get(id).await?;
        if request.status.is_terminal() {
            return Err(SyncError::Validation(format!(
                "Change request {} is already {}",
                id,
                request.status.as_str()
            )));
        }
        Ok(request)
    }

    async fn apply_effect(&self, request: &ChangeRequest) -> SyncResult<()> {
        let pool = self.store.pool()?;
        let target = &request.target_key;
        if items::get(pool, target).await?.is_none() {
            return Err(SyncError::NotFound(format!(
                "Work item {} no longer exists",
                target
            )));
        }

        match &request.data {
            ChangeRequestData::PointChange {
                new_points,
                old_points,
            } => {
                if self.settings.verify_point_snapshot {
                    let swapped =
                        overrides::compare_and_set_points(pool, target, *old_points, *new_points)
                            .await?;
                    if !swapped {
                        let current = overrides::get(pool, target).await?.points;
                        // Left over from an approval whose status write failed
                        if current == Some(*new_points) {
                            info!(target = %target, "Point change already applied");
                            return Ok(());
                        }
                        return Err(SyncError::Conflict(format!(
                            "Points of {} changed from {} to {} since the request was made; \
                             cancel this request and create a new one",
                            target,
                            old_points.unwrap_or(0),
                            current.unwrap_or(0)
                        )));
                    }
                } else {
                    let new_points = *new_points;
                    overrides::modify(pool, target, move |o| o.points = Some(new_points)).await?;
                }
            }
            ChangeRequestData::LinkedIssueChange { new_linked_key, .. } => {
                let Some(item) = items::get(pool, target).await? else {
                    return Err(SyncError::NotFound(format!("Work item {}", target)));
                };
                let previous = item.links.active_key.clone();
                let links = relinked(&item.links, new_linked_key);
                items::set_links(pool, target, &links).await?;

                for issue in previous.iter().chain(std::iter::once(new_linked_key)) {
                    if let Some(kind) = items::mark_pending(pool, issue, SyncParams::light()).await? {
                        self.queues.wake(kind);
                    }
                }
            }
            ChangeRequestData::InvalidateEvent { event_id } => {
                let id = event_id.clone();
                overrides::modify(pool, target, move |o| {
                    o.invalidated_event_ids.insert(id);
                })
                .await?;
                let flipped = items::deactivate_event(pool, target, event_id).await?;
                if flipped == 0 {
                    warn!(target = %target, event_id = %event_id, "Invalidated event had no active entries");
                }
            }
        }
        Ok(())
    }

    /// Move to a terminal status and release the target
    async fn finish(
        &self,
        request: &ChangeRequest,
        status: ChangeRequestStatus,
        actor: &Actor,
        reason: Option<&str>,
    ) -> SyncResult<ChangeRequest> {
        let pool = self.store.pool()?;
        let now = now_millis();
        let resolved =
            change_requests::resolve(pool, &request.id, status, &actor.id, reason, now).await?;
        if !resolved {
            return Err(SyncError::Validation(format!(
                "Change request {} is no longer pending",
                request.id
            )));
        }

        if let Some(kind) =
            items::remove_pending_request(pool, &request.target_key, &request.id).await?
        {
            self.queues.wake(kind);
        }

        info!(
            request_id = %request.id,
            status = status.as_str(),
            processed_by = %actor.id,
            "Change request resolved"
        );
        self.events.emit_lossy(SyncEvent::ChangeRequestResolved {
            request_id: request.id.clone(),
            status: status.as_str().to_string(),
            timestamp: Utc::now(),
        });

        self.get(&request.id).await
    }
}

fn require_admin(actor: &Actor, action: &str) -> SyncResult<()> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(SyncError::PermissionDenied(format!(
            "Only admins can {} change requests",
            action
        )))
    }
}

/// Links with `key` as the active key, added to the linked set if absent
fn relinked(links: &ItemLinks, key: &str) -> ItemLinks {
    let mut linked_keys = links.linked_keys.clone();
    if !linked_keys.iter().any(|k| k == key) {
        linked_keys.push(key.to_string());
        linked_keys.sort();
    }
    ItemLinks {
        active_key: Some(key.to_string()),
        linked_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relinked_appends_once() {
        let links = ItemLinks {
            active_key: Some("KEY-1".into()),
            linked_keys: vec!["KEY-1".into(), "KEY-3".into()],
        };
        let changed = relinked(&links, "KEY-2");
        assert_eq!(changed.active_key.as_deref(), Some("KEY-2"));
        assert_eq!(changed.linked_keys, vec!["KEY-1", "KEY-2", "KEY-3"]);

        let same = relinked(&changed, "KEY-3");
        assert_eq!(same.linked_keys.len(), 3);
    }

    #[test]
    fn test_only_admins_resolve() {
        assert!(require_admin(&Actor::admin("root"), "approve").is_ok());
        assert!(matches!(
            require_admin(&Actor::user("alice"), "approve"),
            Err(SyncError::PermissionDenied(_))
        ));
    }
}
