//! Story-point distribution

use std::collections::{BTreeMap, BTreeSet};

use crate::settings::UNKNOWN_CONTRIBUTOR;

/// Split `total` points across `reviewers`
///
/// Reviewers are ordered by id; each gets `total / n`, and the first
/// `total % n` get one extra point, so the shares sum to `total` and differ
/// by at most one. How often someone reviewed does not matter. With no
/// reviewers, the total goes to the unknown bucket (omitted when zero).
pub fn distribute_points(total: i64, reviewers: &BTreeSet<String>) -> BTreeMap<String, i64> {
    if reviewers.is_empty() {
        return if total == 0 {
            BTreeMap::new()
        } else {
            BTreeMap::from([(UNKNOWN_CONTRIBUTOR.to_string(), total)])
        };
    }

    let n = reviewers.len() as i64;
    let base = total.div_euclid(n);
    let remainder = total.rem_euclid(n);

    reviewers
        .iter()
        .enumerate()
        .map(|(rank, id)| {
            let extra = i64::from((rank as i64) < remainder);
            (id.clone(), base + extra)
        })
        .collect()
}

/// Explicit override map with non-positive entries dropped
pub fn explicit_points(overrides: &BTreeMap<String, i64>) -> BTreeMap<String, i64> {
    overrides
        .iter()
        .filter(|(_, points)| **points > 0)
        .map(|(id, points)| (id.clone(), *points))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_five_points_two_reviewers() {
        let shares = distribute_points(5, &set(&["bob", "alice"]));
        assert_eq!(
            shares,
            BTreeMap::from([("alice".to_string(), 3), ("bob".to_string(), 2)])
        );
    }

    #[test]
    fn test_shares_sum_to_total_and_differ_by_at_most_one() {
        let reviewers = set(&["a", "b", "c", "d", "e", "f", "g"]);
        for total in 0..=40 {
            for n in 1..=reviewers.len() {
                let subset: BTreeSet<String> = reviewers.iter().take(n).cloned().collect();
                let shares = distribute_points(total, &subset);

                assert_eq!(shares.len(), n);
                assert_eq!(shares.values().sum::<i64>(), total);
                let max = shares.values().max().unwrap();
                let min = shares.values().min().unwrap();
                assert!(max - min <= 1, "total {} n {}: {:?}", total, n, shares);
            }
        }
    }

    #[test]
    fn test_no_reviewers_routes_to_unknown() {
        assert_eq!(
            distribute_points(8, &BTreeSet::new()),
            BTreeMap::from([(UNKNOWN_CONTRIBUTOR.to_string(), 8)])
        );
        assert!(distribute_points(0, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_explicit_points_drop_non_positive() {
        let map = BTreeMap::from([("a".to_string(), 2), ("b".to_string(), 0)]);
        assert_eq!(explicit_points(&map), BTreeMap::from([("a".to_string(), 2)]));
    }
}
