//! In-charge sequence, sprint set and completion

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DerivedFields, HistoryEvent, InCharge, ItemSnapshot, Override, SprintRef};
use crate::settings::EngineSettings;

/// Contributors who moved the item into active work, latest time per actor
///
/// The current assignee is appended at `now`.
pub fn in_charge(
    history: &[HistoryEvent],
    snapshot: &ItemSnapshot,
    overrides: &Override,
    settings: &EngineSettings,
    now: i64,
) -> Vec<InCharge> {
    let mut latest: BTreeMap<String, i64> = BTreeMap::new();

    let transitions = history
        .iter()
        .filter(|e| !overrides.is_invalidated(&e.id))
        .filter(|e| e.status_to().is_some_and(|s| settings.active_statuses.contains(s)))
        .filter_map(|e| Some((e.actor.clone()?, e.at)));

    for (actor, at) in transitions.chain(snapshot.assignee.clone().map(|a| (a, now))) {
        let entry = latest.entry(actor).or_insert(at);
        *entry = (*entry).max(at);
    }

    let mut sequence: Vec<InCharge> = latest
        .into_iter()
        .map(|(actor, at)| InCharge { actor, at })
        .collect();
    sequence.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.actor.cmp(&b.actor)));
    sequence
}

/// Sprint ids listed in a sprint field value ("12, 14")
pub fn parse_sprint_ids(value: Option<&str>) -> Vec<i64> {
    value
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

/// Sprint the item belonged to right after `event_index`, from history
fn sprint_at(history: &[HistoryEvent], event_index: usize) -> Option<SprintRef> {
    history[..=event_index]
        .iter()
        .rev()
        .find_map(|e| e.sprint_change())
        .and_then(|change| {
            let id = *parse_sprint_ids(change.to_id.as_deref()).last()?;
            let name = change
                .to_text
                .as_deref()
                .and_then(|names| names.split(',').last())
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            Some(SprintRef { id, name })
        })
}

/// Completion time and sprint
///
/// Once set, completion is kept as is, even if the completing event is
/// invalidated later.
pub fn completion(
    history: &[HistoryEvent],
    snapshot: &ItemSnapshot,
    overrides: &Override,
    previous: &DerivedFields,
    settings: &EngineSettings,
) -> (Option<i64>, Option<SprintRef>) {
    if previous.completed_at.is_some() {
        return (previous.completed_at, previous.completed_sprint.clone());
    }

    let done = history
        .iter()
        .enumerate()
        .filter(|(_, e)| !overrides.is_invalidated(&e.id))
        .filter(|(_, e)| e.status_to().is_some_and(|s| settings.done_statuses.contains(s)))
        .max_by_key(|(index, e)| (e.at, *index));

    match done {
        Some((index, event)) => {
            let sprint = sprint_at(history, index).or_else(|| snapshot.sprint.clone());
            (Some(event.at), sprint)
        }
        None => (None, None),
    }
}

/// Every sprint referenced by sprint changes, plus the completed sprint
pub fn sprint_ids(history: &[HistoryEvent], completed_sprint: Option<&SprintRef>) -> Vec<i64> {
    let mut ids: BTreeSet<i64> = history
        .iter()
        .filter_map(|e| e.sprint_change())
        .flat_map(|change| {
            parse_sprint_ids(change.from_id.as_deref())
                .into_iter()
                .chain(parse_sprint_ids(change.to_id.as_deref()))
        })
        .collect();
    ids.extend(completed_sprint.map(|s| s.id));
    ids.into_iter().collect()
}
