//! Versioned persisted documents
//!
//! The issue log and the dismissal map are stored as tagged documents:
//!
//! ```json
//! { "version": 1, "issues": [ ... ] }
//! { "version": 1, "entries": { "a@b.com": 1718000000000 } }
//! ```
//!
//! Reads run every value through an upgrade step. Untagged values written
//! by earlier releases (a bare issue array, a bare email → expiry object)
//! are accepted and normalized; an issue whose emails were recorded as
//! plain strings gets `isDismissed: false` snapshots.

use crate::detect::normalize_email;
use crate::error::{GuardError, Result};
use crate::types::{DismissalMap, EmailEntry, Issue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current document version
pub const DOCUMENT_VERSION: u32 = 1;

/// Persisted form of the issue log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLogDocument {
    pub version: u32,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Persisted form of the dismissal map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissalDocument {
    pub version: u32,
    #[serde(default)]
    pub entries: DismissalMap,
}

/// Issue shape from untagged storage; emails may be bare strings
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyIssue {
    id: String,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    method: String,
    #[serde(default = "default_true")]
    is_final: bool,
    #[serde(default)]
    emails: Vec<LegacyEmail>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyEmail {
    Plain(String),
    Entry(EmailEntry),
}

fn default_true() -> bool {
    true
}

impl From<LegacyIssue> for Issue {
    fn from(legacy: LegacyIssue) -> Self {
        let emails = legacy
            .emails
            .into_iter()
            .map(|e| match e {
                LegacyEmail::Plain(email) => EmailEntry {
                    email: normalize_email(&email),
                    is_dismissed: false,
                },
                LegacyEmail::Entry(entry) => EmailEntry {
                    email: normalize_email(&entry.email),
                    is_dismissed: entry.is_dismissed,
                },
            })
            .collect();

        Issue {
            id: legacy.id,
            created_at: legacy.created_at,
            url: legacy.url,
            method: legacy.method,
            is_final: legacy.is_final,
            emails,
        }
    }
}

fn document_error(key: &str, reason: impl Into<String>) -> GuardError {
    GuardError::Document {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn check_version(key: &str, value: &Value) -> Result<()> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| document_error(key, "version tag is not an unsigned integer"))?;
    if version == 0 || version > DOCUMENT_VERSION as u64 {
        return Err(document_error(
            key,
            format!("unsupported document version {} (max {})", version, DOCUMENT_VERSION),
        ));
    }
    Ok(())
}

/// Decode the issue log, upgrading untagged values
pub fn decode_issue_log(key: &str, value: Option<Value>) -> Result<Vec<Issue>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            tracing::debug!(key, count = items.len(), "Upgrading untagged issue log");
            items
                .into_iter()
                .map(|item| {
                    serde_json::from_value::<LegacyIssue>(item)
                        .map(Issue::from)
                        .map_err(|e| document_error(key, format!("invalid legacy issue: {}", e)))
                })
                .collect()
        }
        Some(value @ Value::Object(_)) => {
            check_version(key, &value)?;
            let doc: IssueLogDocument = serde_json::from_value(value)
                .map_err(|e| document_error(key, format!("invalid issue log: {}", e)))?;
            Ok(doc.issues)
        }
        Some(other) => Err(document_error(
            key,
            format!("expected an issue log document, found {}", json_kind(&other)),
        )),
    }
}

/// Encode the issue log as a current-version document
pub fn encode_issue_log(issues: &[Issue]) -> Result<Value> {
    Ok(serde_json::to_value(IssueLogDocument {
        version: DOCUMENT_VERSION,
        issues: issues.to_vec(),
    })?)
}

/// Decode the dismissal map, upgrading untagged values
pub fn decode_dismissals(key: &str, value: Option<Value>) -> Result<DismissalMap> {
    let map = match value {
        None | Some(Value::Null) => return Ok(DismissalMap::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(document_error(
                key,
                format!("expected a dismissal document, found {}", json_kind(&other)),
            ))
        }
    };

    if map.contains_key("version") && map.contains_key("entries") {
        let value = Value::Object(map);
        check_version(key, &value)?;
        let doc: DismissalDocument = serde_json::from_value(value)
            .map_err(|e| document_error(key, format!("invalid dismissal map: {}", e)))?;
        return Ok(doc.entries);
    }

    tracing::debug!(key, count = map.len(), "Upgrading untagged dismissal map");
    map.into_iter()
        .map(|(email, until)| {
            let until = until
                .as_i64()
                .or_else(|| until.as_f64().map(|f| f as i64))
                .ok_or_else(|| {
                    document_error(key, format!("expiry for '{}' is not a number", email))
                })?;
            Ok((normalize_email(&email), until))
        })
        .collect()
}

/// Encode the dismissal map as a current-version document
pub fn encode_dismissals(entries: &DismissalMap) -> Result<Value> {
    Ok(serde_json::to_value(DismissalDocument {
        version: DOCUMENT_VERSION,
        entries: entries.clone(),
    })?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
