//! Timestamp utilities
//!
//! All persisted timestamps are Unix epoch milliseconds (`i64`).

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// Current UTC time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a source timestamp into epoch milliseconds
///
/// Accepts RFC 3339 (`2024-03-01T10:00:00.000+00:00`, Bitbucket) and the
/// Jira variant without a colon in the offset (`2024-03-01T10:00:00.000+0000`).
pub fn parse_millis(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    DateTime::<FixedOffset>::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Format epoch milliseconds as RFC 3339 UTC
pub fn to_rfc3339(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_recent() {
        let now = now_millis();
        assert!(now > 946_684_800_000); // 2000-01-01
        assert!(now < 4_102_444_800_000); // 2100-01-01
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_millis("1970-01-01T00:00:01+00:00"), Some(1000));
        assert_eq!(parse_millis("1970-01-01T00:00:00.250Z"), Some(250));
    }

    #[test]
    fn test_parse_jira_offset_without_colon() {
        assert_eq!(parse_millis("1970-01-01T00:00:02.000+0000"), Some(2000));
        assert_eq!(parse_millis("1970-01-01T01:00:00.000+0100"), Some(0));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_millis("yesterday"), None);
        assert_eq!(parse_millis(""), None);
    }

    #[test]
    fn test_rfc3339_round_trip_of_epoch() {
        assert_eq!(parse_millis(&to_rfc3339(1_700_000_000_123)), Some(1_700_000_000_123));
    }
}
