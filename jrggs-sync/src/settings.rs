//! Engine tuning decoded from the `[engine]` section of the bootstrap config
//!
//! Every fallback value is a named constant so it is declared once and can be
//! asserted on in tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Items claimed per processing batch
pub const DEFAULT_BATCH_SIZE: usize = 20;
/// Items requested per ingestion page
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Ingestion pages before a pass is aborted
pub const DEFAULT_MAX_PAGES: u32 = 100;
/// Per-call timeout for outbound source requests
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Interval between ingestion ticks
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
/// Interval between processing ticks
pub const DEFAULT_PROCESS_INTERVAL_SECS: u64 = 20;
/// Watermark used before the first successful pass (epoch millis)
pub const DEFAULT_WATERMARK: i64 = 0;
/// Bucket receiving points and defects with no attributable contributor
pub const UNKNOWN_CONTRIBUTOR: &str = "unknown";
/// Title marker identifying defect children
pub const DEFAULT_DEFECT_MARKER: &str = "defect";

/// Status names that put an item into active work
pub const DEFAULT_ACTIVE_STATUSES: &[&str] = &["in progress", "code review"];
/// Status names that count as a code review
pub const DEFAULT_REVIEW_STATUSES: &[&str] = &["code review"];
/// Status names that count as a rejection
pub const DEFAULT_REJECTED_STATUSES: &[&str] = &["rejected", "reopened"];
/// Status names that complete an item
pub const DEFAULT_DONE_STATUSES: &[&str] = &["done", "closed"];
/// Contributor roles allowed to produce code-review events
pub const DEFAULT_REVIEWER_ROLES: &[&str] = &["reviewer", "developer"];

/// Case-insensitive set of status names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusFamily(Vec<String>);

impl StatusFamily {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
        )
    }

    /// True when `status` belongs to the family (ignoring case and padding)
    pub fn contains(&self, status: &str) -> bool {
        let status = status.trim().to_lowercase();
        self.0.iter().any(|s| s.trim().to_lowercase() == status)
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub batch_size: usize,
    pub page_size: u32,
    pub max_pages: u32,
    pub fetch_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub process_interval_secs: u64,
    pub default_watermark: i64,

    pub active_statuses: StatusFamily,
    pub review_statuses: StatusFamily,
    pub rejected_statuses: StatusFamily,
    pub done_statuses: StatusFamily,

    pub defect_marker: String,
    pub reviewer_roles: Vec<String>,

    /// Account excluded from pull-request comment counts unless overridden
    pub owner_account: Option<String>,

    /// Project prefixes recognised in `PREFIX-123` link tokens
    pub link_prefixes: Vec<String>,

    /// Re-check the snapshotted value when approving a point change
    pub verify_point_snapshot: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            process_interval_secs: DEFAULT_PROCESS_INTERVAL_SECS,
            default_watermark: DEFAULT_WATERMARK,
            active_statuses: StatusFamily::new(DEFAULT_ACTIVE_STATUSES),
            review_statuses: StatusFamily::new(DEFAULT_REVIEW_STATUSES),
            rejected_statuses: StatusFamily::new(DEFAULT_REJECTED_STATUSES),
            done_statuses: StatusFamily::new(DEFAULT_DONE_STATUSES),
            defect_marker: DEFAULT_DEFECT_MARKER.to_string(),
            reviewer_roles: DEFAULT_REVIEWER_ROLES.iter().map(|r| r.to_string()).collect(),
            owner_account: None,
            link_prefixes: Vec::new(),
            verify_point_snapshot: true,
        }
    }
}

impl EngineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs.max(1))
    }

    /// True when `title` carries the defect marker (case-insensitive)
    pub fn is_defect_title(&self, title: &str) -> bool {
        let marker = self.defect_marker.trim().to_lowercase();
        !marker.is_empty() && title.to_lowercase().contains(&marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrggs_common::config::AppConfig;

    #[test]
    fn test_status_family_is_case_insensitive() {
        let family = StatusFamily::new(["In Progress", "Code Review"]);
        assert!(family.contains("in progress"));
        assert!(family.contains("  CODE REVIEW "));
        assert!(!family.contains("Done"));
    }

    #[test]
    fn test_engine_section_partial_override() {
        let config = AppConfig::from_toml_str(
            r#"
            [engine]
            batch_size = 5
            link_prefixes = ["KEY", "OPS"]
            done_statuses = ["Resolved"]
            "#,
        )
        .unwrap();

        let settings: EngineSettings = config.engine_section().unwrap();
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(settings.link_prefixes, vec!["KEY", "OPS"]);
        assert!(settings.done_statuses.contains("resolved"));
        assert!(!settings.done_statuses.contains("done"));
        assert!(settings.verify_point_snapshot);
    }

    #[test]
    fn test_defect_marker_matching() {
        let settings = EngineSettings::default();
        assert!(settings.is_defect_title("[Defect] login fails"));
        assert!(!settings.is_defect_title("Add login page"));
    }
}
