//! Cross-entity links between pull requests and issues
//!
//! Linked keys are `PREFIX-123` tokens found in a pull request's title and
//! comment bodies, matched case-insensitively against configured project
//! prefixes and normalised to uppercase.

use regex::Regex;
use std::collections::BTreeSet;

use crate::error::{SyncError, SyncResult};
use crate::models::ItemLinks;

/// Finds linked item keys in free text
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    pattern: Option<Regex>,
    any_key: Regex,
}

impl LinkExtractor {
    /// Build an extractor for `prefixes`; no prefixes means no links
    pub fn new(prefixes: &[String]) -> SyncResult<Self> {
        let alternatives: Vec<String> = prefixes
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        let any_key = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*-\d+$")
            .map_err(|e| SyncError::Validation(format!("Invalid key pattern: {}", e)))?;
        if alternatives.is_empty() {
            return Ok(Self {
                pattern: None,
                any_key,
            });
        }

        let pattern = format!(r"(?i)\b(?:{})-\d+\b", alternatives.join("|"));
        let pattern = Regex::new(&pattern)
            .map_err(|e| SyncError::Validation(format!("Invalid link prefixes: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
            any_key,
        })
    }

    /// Keys in order of first appearance, uppercase, without duplicates
    pub fn extract<'a, I>(&self, texts: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        for text in texts {
            for found in pattern.find_iter(text) {
                let key = found.as_str().to_uppercase();
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// True when `key` can be set as a link by hand
    ///
    /// With prefixes configured the key must use one of them; without,
    /// any `PREFIX-123` shaped key is accepted.
    pub fn accepts(&self, key: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern
                .find(key)
                .is_some_and(|m| m.start() == 0 && m.end() == key.len()),
            None => self.any_key.is_match(key),
        }
    }
}

/// Fold newly discovered keys into existing links
///
/// The active key stays if already set, otherwise it is the first key
/// discovered. The linked set is sorted and always contains the active key.
pub fn resolve_links(existing: &ItemLinks, discovered: &[String]) -> ItemLinks {
    let active_key = existing
        .active_key
        .clone()
        .or_else(|| discovered.first().cloned());

    let linked: BTreeSet<String> = existing
        .linked_keys
        .iter()
        .chain(discovered)
        .chain(active_key.iter())
        .cloned()
        .collect();

    ItemLinks {
        active_key,
        linked_keys: linked.into_iter().collect(),
    }
}

/// Items whose link to this one changed and need a light recompute
///
/// That is every key added to or removed from the linked set, plus the old
/// and new active key when the active key changed.
pub fn cascade_targets(before: &ItemLinks, after: &ItemLinks) -> Vec<String> {
    let old: BTreeSet<&String> = before.linked_keys.iter().collect();
    let new: BTreeSet<&String> = after.linked_keys.iter().collect();

    let mut targets: BTreeSet<String> = old.symmetric_difference(&new).map(|k| (*k).clone()).collect();
    if before.active_key != after.active_key {
        targets.extend(before.active_key.clone());
        targets.extend(after.active_key.clone());
    }
    targets.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LinkExtractor {
        LinkExtractor::new(&["KEY".to_string()]).unwrap()
    }

    #[test]
    fn test_title_and_comment_keys() {
        let keys = extractor().extract(["Fix bug KEY-42", "see key-43"]);
        assert_eq!(keys, vec!["KEY-42", "KEY-43"]);

        let links = resolve_links(&ItemLinks::default(), &keys);
        assert_eq!(links.linked_keys, vec!["KEY-42", "KEY-43"]);
        assert_eq!(links.active_key.as_deref(), Some("KEY-42"));
    }

    #[test]
    fn test_extract_dedups_and_ignores_other_prefixes() {
        let keys = extractor().extract(["KEY-7 and KEY-7, OPS-1, MONKEY-3, key-70x"]);
        assert_eq!(keys, vec!["KEY-7"]);
    }

    #[test]
    fn test_no_prefixes_extracts_nothing() {
        let extractor = LinkExtractor::new(&[]).unwrap();
        assert!(extractor.extract(["KEY-1"]).is_empty());
        assert!(extractor.accepts("OPS-1"));
        assert!(!extractor.accepts("not a key"));
    }

    #[test]
    fn test_existing_active_key_is_kept() {
        let existing = ItemLinks {
            active_key: Some("KEY-9".into()),
            linked_keys: vec!["KEY-9".into()],
        };
        let links = resolve_links(&existing, &["KEY-3".to_string()]);
        assert_eq!(links.active_key.as_deref(), Some("KEY-9"));
        assert_eq!(links.linked_keys, vec!["KEY-3", "KEY-9"]);
    }

    #[test]
    fn test_cascade_targets() {
        let before = ItemLinks {
            active_key: Some("KEY-1".into()),
            linked_keys: vec!["KEY-1".into(), "KEY-2".into()],
        };
        let after = ItemLinks {
            active_key: Some("KEY-3".into()),
            linked_keys: vec!["KEY-1".into(), "KEY-2".into(), "KEY-3".into()],
        };
        assert_eq!(cascade_targets(&before, &after), vec!["KEY-1", "KEY-3"]);
        assert!(cascade_targets(&after, &after).is_empty());
    }

    #[test]
    fn test_accepts_configured_prefix_only() {
        let extractor = extractor();
        assert!(extractor.accepts("KEY-12"));
        assert!(!extractor.accepts("KEY-12 extra"));
        assert!(!extractor.accepts("OPS-12"));
    }
}
