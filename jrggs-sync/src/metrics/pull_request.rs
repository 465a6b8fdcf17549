//! Pull-request review aggregates

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Activity, HistoryEvent, ItemSnapshot, Override, PullRequestData};
use crate::settings::EngineSettings;

/// Aggregate the active activity log of a pull request
///
/// Comment counts skip the owner account (override first, then settings).
/// Admin count overrides replace the computed totals.
pub fn pull_request_data(
    history: &[HistoryEvent],
    snapshot: &ItemSnapshot,
    overrides: &Override,
    settings: &EngineSettings,
) -> PullRequestData {
    let owner = overrides
        .owner_account
        .as_deref()
        .or(settings.owner_account.as_deref());

    let mut data = PullRequestData::default();
    let mut approvers = BTreeSet::new();
    let mut decliners = BTreeSet::new();
    let mut comment_counts: BTreeMap<String, u32> = BTreeMap::new();

    for event in history.iter().filter(|e| !overrides.is_invalidated(&e.id)) {
        match &event.activity {
            Some(Activity::Comment { .. }) => {
                data.total_comments += 1;
                if let Some(actor) = event.actor.as_deref().filter(|a| Some(*a) != owner) {
                    *comment_counts.entry(actor.to_string()).or_default() += 1;
                }
            }
            Some(Activity::Approval) => {
                data.total_approvals += 1;
                approvers.extend(event.actor.clone());
            }
            Some(Activity::Decline) => {
                data.total_declines += 1;
                decliners.extend(event.actor.clone());
            }
            Some(Activity::Other) | None => continue,
        }

        if matches!(event.activity, Some(Activity::Comment { .. }) | Some(Activity::Approval)) {
            data.first_review_at = Some(data.first_review_at.map_or(event.at, |t| t.min(event.at)));
        }
    }

    data.approvers = approvers.into_iter().collect();
    data.decliners = decliners.into_iter().collect();
    data.comment_counts = comment_counts;
    data.person_in_charge = overrides
        .person_in_charge
        .clone()
        .or_else(|| snapshot.author.clone());
    data.points = overrides.points.unwrap_or(0);

    if let Some(total) = overrides.counts.total_comments {
        data.total_comments = total;
    }
    if let Some(total) = overrides.counts.total_approvals {
        data.total_approvals = total;
    }
    if let Some(total) = overrides.counts.total_declines {
        data.total_declines = total;
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(id: &str, actor: &str, at: i64, activity: Activity) -> HistoryEvent {
        HistoryEvent {
            id: id.to_string(),
            actor: Some(actor.to_string()),
            at,
            changes: Vec::new(),
            activity: Some(activity),
        }
    }

    fn comment(id: &str, actor: &str, at: i64) -> HistoryEvent {
        activity(id, actor, at, Activity::Comment { body: String::new() })
    }

    #[test]
    fn test_partitions_activity() {
        let history = vec![
            comment("c1", "owner", 50),
            comment("c2", "bob", 30),
            activity("a1", "carol", 40, Activity::Approval),
            activity("a2", "carol", 45, Activity::Approval),
            activity("d1", "dave", 60, Activity::Decline),
            comment("c3", "bob", 70),
        ];
        let snapshot = ItemSnapshot {
            author: Some("alice".into()),
            ..Default::default()
        };
        let mut overrides = Override::empty("acme/app#1");
        overrides.owner_account = Some("owner".into());

        let data = pull_request_data(&history, &snapshot, &overrides, &EngineSettings::default());

        assert_eq!(data.total_comments, 3);
        assert_eq!(data.total_approvals, 2);
        assert_eq!(data.total_declines, 1);
        assert_eq!(data.approvers, vec!["carol"]);
        assert_eq!(data.decliners, vec!["dave"]);
        assert_eq!(data.first_review_at, Some(30));
        assert_eq!(data.comment_counts, BTreeMap::from([("bob".to_string(), 2)]));
        assert_eq!(data.person_in_charge.as_deref(), Some("alice"));
        assert_eq!(data.points, 0);
    }

    #[test]
    fn test_overrides_layer_on_top() {
        let history = vec![comment("c1", "bob", 10)];
        let mut overrides = Override::empty("acme/app#1");
        overrides.person_in_charge = Some("erin".into());
        overrides.points = Some(3);
        overrides.counts.total_comments = Some(0);
        overrides.invalidated_event_ids.insert("c1".into());

        let data = pull_request_data(
            &history,
            &ItemSnapshot::default(),
            &overrides,
            &EngineSettings::default(),
        );
        assert_eq!(data.total_comments, 0);
        assert!(data.comment_counts.is_empty());
        assert_eq!(data.first_review_at, None);
        assert_eq!(data.person_in_charge.as_deref(), Some("erin"));
        assert_eq!(data.points, 3);
    }
}
