//! Core record types for the mailguard system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized email → absolute expiry (Unix milliseconds)
///
/// An entry means "suppress alerting for this email until this time".
pub type DismissalMap = BTreeMap<String, i64>;

/// Milliseconds per hour, used for dismissal horizons
pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// One detected email inside an [`Issue`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEntry {
    /// Normalized (trimmed, lower-cased) address
    pub email: String,

    /// Whether the address was dismissed when the issue was recorded
    pub is_dismissed: bool,
}

/// A persisted record of a finalized request that contained emails
///
/// Created once, never mutated. The `id` is the caller-supplied
/// correlation id and doubles as the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,

    /// Unix timestamp in milliseconds
    pub created_at: i64,

    pub url: String,
    pub method: String,
    pub is_final: bool,

    /// Detected emails in first-occurrence order
    pub emails: Vec<EmailEntry>,
}

impl Issue {
    /// Creation time as a UTC datetime
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }

    /// Emails that were not dismissed at record time
    pub fn undismissed(&self) -> impl Iterator<Item = &EmailEntry> {
        self.emails.iter().filter(|e| !e.is_dismissed)
    }
}

/// Whether an email is currently dismissed, and until when
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissalStatus {
    pub dismissed: bool,

    /// Expiry in Unix milliseconds, 0 when no entry exists
    pub until: i64,
}

/// An email is dismissed iff an entry exists and its expiry is strictly in the future
pub fn is_dismissed(email: &str, dismissed: &DismissalMap, now: i64) -> bool {
    dismissed.get(email).is_some_and(|&until| until > now)
}

/// Full issue log plus the current dismissal map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    #[serde(default)]
    pub issues: Vec<Issue>,

    #[serde(default)]
    pub dismissed: DismissalMap,
}

impl HistorySnapshot {
    /// The most recently created issue; the earliest logged wins ties
    pub fn latest_issue(&self) -> Option<&Issue> {
        self.issues.iter().fold(None, |best: Option<&Issue>, cur| match best {
            Some(b) if cur.created_at <= b.created_at => Some(b),
            _ => Some(cur),
        })
    }

    /// Dismissal state of `email` (normalized before lookup) at `now`
    pub fn dismissal_status(&self, email: &str, now: i64) -> DismissalStatus {
        let key = crate::detect::normalize_email(email);
        let until = self.dismissed.get(&key).copied().unwrap_or(0);
        DismissalStatus {
            dismissed: until > now,
            until,
        }
    }
}

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(id: &str, created_at: i64) -> Issue {
        Issue {
            id: id.to_string(),
            created_at,
            url: "https://chatgpt.com/backend-api/conversation".to_string(),
            method: "POST".to_string(),
            is_final: true,
            emails: vec![EmailEntry {
                email: "x@y.com".to_string(),
                is_dismissed: false,
            }],
        }
    }

    #[test]
    fn test_issue_serializes_camel_case() {
        let json = serde_json::to_value(issue("req-1", 42)).unwrap();
        assert_eq!(json["createdAt"], 42);
        assert_eq!(json["isFinal"], true);
        assert_eq!(json["emails"][0]["isDismissed"], false);
    }

    #[test]
    fn test_is_dismissed_is_strict() {
        let mut map = DismissalMap::new();
        map.insert("a@b.com".to_string(), 1_000);

        assert!(is_dismissed("a@b.com", &map, 999));
        assert!(!is_dismissed("a@b.com", &map, 1_000));
        assert!(!is_dismissed("c@d.com", &map, 0));
    }

    #[test]
    fn test_latest_issue_prefers_newest_then_first() {
        let snapshot = HistorySnapshot {
            issues: vec![issue("a", 10), issue("b", 30), issue("c", 30), issue("d", 20)],
            dismissed: DismissalMap::new(),
        };
        assert_eq!(snapshot.latest_issue().unwrap().id, "b");
        assert!(HistorySnapshot::default().latest_issue().is_none());
    }

    #[test]
    fn test_dismissal_status_normalizes() {
        let mut snapshot = HistorySnapshot::default();
        snapshot.dismissed.insert("a@b.com".to_string(), 5_000);

        let status = snapshot.dismissal_status("  A@B.com ", 4_000);
        assert!(status.dismissed);
        assert_eq!(status.until, 5_000);

        let missing = snapshot.dismissal_status("z@z.com", 4_000);
        assert_eq!(missing, DismissalStatus { dismissed: false, until: 0 });
    }

    #[test]
    fn test_created_at_utc() {
        let i = issue("a", 0);
        assert_eq!(i.created_at_utc().unwrap().timestamp(), 0);
    }
}
