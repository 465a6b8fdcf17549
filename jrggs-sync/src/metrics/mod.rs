//! Metrics derivation
//!
//! A pure function from an item's history, its override, its snapshot and
//! its previous derived fields to new derived fields. "Now" is the item's
//! source update time, so re-running on unchanged inputs gives identical
//! output. An event is active when the override does not invalidate it.

pub mod defects;
pub mod distribution;
pub mod pull_request;
pub mod reviews;
pub mod timeline;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::directory::RoleLookup;
use crate::error::{SyncError, SyncResult};
use crate::models::{DerivedFields, HistoryEvent, ItemSnapshot, Override, UserMetrics};
use crate::settings::EngineSettings;

pub use defects::ChildItem;
pub use distribution::distribute_points;
pub use pull_request::pull_request_data;

/// Everything an issue derivation reads
pub struct IssueInputs<'a> {
    pub key: &'a str,
    pub history: &'a [HistoryEvent],
    pub snapshot: &'a ItemSnapshot,
    pub overrides: &'a Override,
    pub previous: &'a DerivedFields,
    pub children: &'a [ChildItem],
    pub roles: &'a dyn RoleLookup,
    pub settings: &'a EngineSettings,
}

/// Reject histories the derivation cannot work with
fn check_history(key: &str, history: &[HistoryEvent]) -> SyncResult<()> {
    let mut seen = HashSet::new();
    for event in history {
        if event.id.trim().is_empty() {
            return Err(SyncError::Computation(format!(
                "{}: history event at {} has no id",
                key, event.at
            )));
        }
        if !seen.insert(event.id.as_str()) {
            return Err(SyncError::Computation(format!(
                "{}: duplicate history event {}",
                key, event.id
            )));
        }
    }
    Ok(())
}

/// Derive all issue fields
pub fn derive_issue(inputs: &IssueInputs<'_>) -> SyncResult<DerivedFields> {
    let IssueInputs {
        key,
        history,
        snapshot,
        overrides,
        previous,
        children,
        roles,
        settings,
    } = *inputs;

    check_history(key, history)?;

    let total_points = overrides.points.or(snapshot.story_points).unwrap_or(0);
    if total_points < 0 {
        return Err(SyncError::Computation(format!(
            "{}: negative story points {}",
            key, total_points
        )));
    }

    let now = snapshot.updated_at;
    let in_charge = timeline::in_charge(history, snapshot, overrides, settings, now);
    let code_reviews = reviews::code_reviews(history, overrides, roles, settings);
    let rejections = reviews::rejections(history, &code_reviews, overrides, settings);

    let explicit = distribution::explicit_points(&overrides.story_points);
    let story_points = if explicit.is_empty() {
        let reviewers: BTreeSet<String> = code_reviews
            .iter()
            .filter(|r| r.active)
            .map(|r| r.actor.clone())
            .collect();
        distribute_points(total_points, &reviewers)
    } else {
        explicit
    };

    let defects = defects::defects(children, overrides, settings);
    let (completed_at, completed_sprint) =
        timeline::completion(history, snapshot, overrides, previous, settings);
    let sprint_ids = timeline::sprint_ids(history, completed_sprint.as_ref());

    let mut derived = DerivedFields {
        metrics: BTreeMap::new(),
        in_charge,
        code_reviews,
        rejections,
        defects,
        story_points,
        sprint_ids,
        completed_at,
        completed_sprint,
        pull_request: None,
    };
    derived.metrics = aggregate(&derived);
    Ok(derived)
}

/// Per-user counters over reviews, rejections, points and defects
///
/// Every user mentioned anywhere gets an entry; counts only include
/// active entries.
pub fn aggregate(derived: &DerivedFields) -> BTreeMap<String, UserMetrics> {
    let mut metrics: BTreeMap<String, UserMetrics> = BTreeMap::new();

    for review in &derived.code_reviews {
        let entry = metrics.entry(review.actor.clone()).or_default();
        entry.n_code_reviews += u32::from(review.active);
    }
    for rejection in &derived.rejections {
        let entry = metrics.entry(rejection.actor.clone()).or_default();
        entry.n_rejections += u32::from(rejection.active);
    }
    for (user, points) in &derived.story_points {
        metrics.entry(user.clone()).or_default().story_points += points;
    }
    for defect in &derived.defects {
        let entry = metrics.entry(defect.actor.clone()).or_default();
        entry.n_defects += u32::from(defect.active);
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticRoles;
    use crate::models::{FieldChange, SprintRef};
    use crate::db::contributors::Contributor;
    use crate::settings::UNKNOWN_CONTRIBUTOR;

    fn status(id: &str, actor: &str, at: i64, to: &str) -> HistoryEvent {
        HistoryEvent {
            id: id.to_string(),
            actor: Some(actor.to_string()),
            at,
            changes: vec![FieldChange {
                field: "status".into(),
                to_text: Some(to.to_string()),
                ..Default::default()
            }],
            activity: None,
        }
    }

    fn sprint(id: &str, at: i64, from: Option<&str>, to: &str, name: &str) -> HistoryEvent {
        HistoryEvent {
            id: id.to_string(),
            actor: Some("pm".into()),
            at,
            changes: vec![FieldChange {
                field: "Sprint".into(),
                from_id: from.map(str::to_string),
                to_id: Some(to.to_string()),
                to_text: Some(name.to_string()),
                ..Default::default()
            }],
            activity: None,
        }
    }

    fn roles() -> StaticRoles {
        let contributor = |id: &str| Contributor {
            id: id.to_string(),
            display_name: None,
            role: "reviewer".into(),
        };
        StaticRoles::new(
            vec![contributor("A"), contributor("B"), contributor("alice"), contributor("bob")],
            &["reviewer".to_string()],
        )
    }

    fn derive(
        history: &[HistoryEvent],
        snapshot: &ItemSnapshot,
        overrides: &Override,
        previous: &DerivedFields,
    ) -> DerivedFields {
        let roles = roles();
        let settings = EngineSettings::default();
        derive_issue(&IssueInputs {
            key: "KEY-1",
            history,
            snapshot,
            overrides,
            previous,
            children: &[],
            roles: &roles,
            settings: &settings,
        })
        .unwrap()
    }

    fn review_reject_history() -> Vec<HistoryEvent> {
        vec![
            status("1", "A", 10, "Code Review"),
            status("2", "qa", 20, "Rejected"),
            status("3", "B", 30, "Code Review"),
            status("4", "qa", 40, "Rejected"),
        ]
    }

    #[test]
    fn test_rejections_attributed_to_last_reviewer() {
        let history = review_reject_history();
        let derived = derive(
            &history,
            &ItemSnapshot::default(),
            &Override::empty("KEY-1"),
            &DerivedFields::default(),
        );

        assert_eq!(derived.metrics["A"].n_rejections, 1);
        assert_eq!(derived.metrics["B"].n_rejections, 1);
        assert_eq!(derived.rejections[0].rejected_by.as_deref(), Some("qa"));
    }

    #[test]
    fn test_invalidating_rejection_only_affects_its_reviewer() {
        let history = review_reject_history();
        let mut overrides = Override::empty("KEY-1");
        overrides.invalidated_event_ids.insert("2".into());

        let derived = derive(
            &history,
            &ItemSnapshot::default(),
            &overrides,
            &DerivedFields::default(),
        );

        assert_eq!(derived.metrics["A"].n_rejections, 0);
        assert_eq!(derived.metrics["B"].n_rejections, 1);
        assert!(!derived.rejections[0].active);
    }

    #[test]
    fn test_rejection_without_reviewer_goes_to_unknown() {
        let history = vec![
            status("1", "A", 10, "Code Review"),
            status("2", "qa", 20, "Rejected"),
            status("3", "qa", 30, "Rejected"),
        ];
        let derived = derive(
            &history,
            &ItemSnapshot::default(),
            &Override::empty("KEY-1"),
            &DerivedFields::default(),
        );
        assert_eq!(derived.rejections[1].actor, UNKNOWN_CONTRIBUTOR);
        assert_eq!(derived.metrics[UNKNOWN_CONTRIBUTOR].n_rejections, 1);
    }

    #[test]
    fn test_points_follow_reviewer_set_not_review_count() {
        let history = vec![
            status("1", "bob", 10, "Code Review"),
            status("2", "bob", 20, "Code Review"),
            status("3", "bob", 30, "Code Review"),
            status("4", "alice", 40, "Code Review"),
        ];
        let snapshot = ItemSnapshot {
            story_points: Some(5),
            ..Default::default()
        };
        let derived = derive(&history, &snapshot, &Override::empty("KEY-1"), &DerivedFields::default());

        assert_eq!(derived.story_points["alice"], 3);
        assert_eq!(derived.story_points["bob"], 2);
        assert_eq!(derived.metrics["bob"].n_code_reviews, 3);
    }

    #[test]
    fn test_explicit_story_points_used_verbatim() {
        let history = vec![status("1", "bob", 10, "Code Review")];
        let snapshot = ItemSnapshot {
            story_points: Some(5),
            ..Default::default()
        };
        let mut overrides = Override::empty("KEY-1");
        overrides.story_points = BTreeMap::from([("carol".to_string(), 4), ("dave".to_string(), 0)]);

        let derived = derive(&history, &snapshot, &overrides, &DerivedFields::default());
        assert_eq!(derived.story_points, BTreeMap::from([("carol".to_string(), 4)]));
        assert_eq!(derived.metrics["bob"].story_points, 0);
    }

    #[test]
    fn test_in_charge_dedup_and_order() {
        let history = vec![
            status("1", "alice", 10, "In Progress"),
            status("2", "bob", 20, "In Progress"),
            status("3", "alice", 30, "Code Review"),
            status("4", "carol", 35, "Done"),
        ];
        let snapshot = ItemSnapshot {
            assignee: Some("dave".into()),
            updated_at: 50,
            ..Default::default()
        };
        let derived = derive(&history, &snapshot, &Override::empty("KEY-1"), &DerivedFields::default());

        let sequence: Vec<_> = derived
            .in_charge
            .iter()
            .map(|c| (c.actor.as_str(), c.at))
            .collect();
        assert_eq!(sequence, vec![("bob", 20), ("alice", 30), ("dave", 50)]);
    }

    #[test]
    fn test_completion_snapshots_sprint_and_is_sticky() {
        let history = vec![
            sprint("1", 5, None, "10", "Sprint 10"),
            status("2", "alice", 10, "Done"),
            sprint("3", 15, Some("10"), "11", "Sprint 11"),
        ];
        let derived = derive(
            &history,
            &ItemSnapshot::default(),
            &Override::empty("KEY-1"),
            &DerivedFields::default(),
        );
        assert_eq!(derived.completed_at, Some(10));
        assert_eq!(
            derived.completed_sprint,
            Some(SprintRef {
                id: 10,
                name: Some("Sprint 10".into())
            })
        );
        assert_eq!(derived.sprint_ids, vec![10, 11]);

        // Invalidating the completing event does not undo completion
        let mut overrides = Override::empty("KEY-1");
        overrides.invalidated_event_ids.insert("2".into());
        let again = derive(&history, &ItemSnapshot::default(), &overrides, &derived);
        assert_eq!(again.completed_at, Some(10));
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let history = review_reject_history();
        let snapshot = ItemSnapshot {
            story_points: Some(3),
            assignee: Some("A".into()),
            updated_at: 99,
            ..Default::default()
        };
        let overrides = Override::empty("KEY-1");

        let first = derive(&history, &snapshot, &overrides, &DerivedFields::default());
        let second = derive(&history, &snapshot, &overrides, &first);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_history_without_event_id_is_computation_error() {
        let history = vec![status("", "A", 10, "Code Review")];
        let roles = roles();
        let settings = EngineSettings::default();
        let result = derive_issue(&IssueInputs {
            key: "KEY-1",
            history: &history,
            snapshot: &ItemSnapshot::default(),
            overrides: &Override::empty("KEY-1"),
            previous: &DerivedFields::default(),
            children: &[],
            roles: &roles,
            settings: &settings,
        });
        assert!(matches!(result, Err(SyncError::Computation(_))));
    }

    #[test]
    fn test_defects_attributed_to_child_reviewer() {
        let children = vec![
            ChildItem {
                key: "KEY-2".into(),
                title: "Defect: wrong total".into(),
                excluded: false,
                first_reviewer: Some("bob".into()),
            },
            ChildItem {
                key: "KEY-3".into(),
                title: "Defect: crash".into(),
                excluded: false,
                first_reviewer: None,
            },
            ChildItem {
                key: "KEY-4".into(),
                title: "Defect: excluded".into(),
                excluded: true,
                first_reviewer: Some("bob".into()),
            },
            ChildItem {
                key: "KEY-5".into(),
                title: "Subtask".into(),
                excluded: false,
                first_reviewer: Some("bob".into()),
            },
        ];
        let mut overrides = Override::empty("KEY-1");
        overrides.invalidated_event_ids.insert("KEY-3".into());
        let roles = roles();
        let settings = EngineSettings::default();

        let derived = derive_issue(&IssueInputs {
            key: "KEY-1",
            history: &[],
            snapshot: &ItemSnapshot::default(),
            overrides: &overrides,
            previous: &DerivedFields::default(),
            children: &children,
            roles: &roles,
            settings: &settings,
        })
        .unwrap();

        assert_eq!(derived.defects.len(), 2);
        assert_eq!(derived.metrics["bob"].n_defects, 1);
        assert_eq!(derived.metrics[UNKNOWN_CONTRIBUTOR].n_defects, 0);
    }
}
