//! Email detection and redaction
//!
//! Pure functions over a request body: decide whether the request is a
//! final submission, extract normalized email addresses, and replace them
//! with a placeholder. Redaction is independent of dismissal state.

use crate::error::{GuardError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Email matching pattern (case-insensitive)
pub const EMAIL_PATTERN: &str = r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}";

/// Placeholder substituted for every detected address
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL_REDACTED]";

/// Body field that marks an intermediate (streaming) submission
pub const PARTIAL_MARKER: &str = "partial_query";

/// Compiled email pattern plus the placeholder it redacts to
#[derive(Debug, Clone)]
pub struct EmailDetector {
    pattern: Regex,
    placeholder: String,
}

impl EmailDetector {
    /// Create a detector with a custom placeholder
    ///
    /// Fails if the placeholder itself would be detected as an email,
    /// since redaction would then stop being idempotent.
    pub fn new(placeholder: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(EMAIL_PATTERN).map_err(|e| GuardError::Pattern {
            pattern: EMAIL_PATTERN.to_string(),
            reason: e.to_string(),
        })?;
        let placeholder = placeholder.into();
        if pattern.is_match(&placeholder) {
            return Err(GuardError::Config(format!(
                "Placeholder '{}' matches the email pattern",
                placeholder
            )));
        }
        Ok(Self { pattern, placeholder })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Distinct normalized emails in first-occurrence order
    pub fn find_emails(&self, body: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pattern
            .find_iter(body)
            .map(|m| normalize_email(m.as_str()))
            .filter(|email| seen.insert(email.clone()))
            .collect()
    }

    /// Replace every match with the placeholder
    pub fn redact(&self, body: &str) -> String {
        self.pattern
            .replace_all(body, regex::NoExpand(&self.placeholder))
            .into_owned()
    }
}

fn default_detector() -> &'static EmailDetector {
    static DETECTOR: OnceLock<EmailDetector> = OnceLock::new();
    DETECTOR.get_or_init(|| {
        EmailDetector::new(EMAIL_PLACEHOLDER).expect("built-in email pattern and placeholder are valid")
    })
}

/// Trim and lower-case an address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Whether a request body is a final (non-streaming) submission
///
/// Unparsable bodies count as final. A parsed object carrying a truthy
/// `partial_query` field is not final.
pub fn is_final_request(body: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => !map.get(PARTIAL_MARKER).is_some_and(is_truthy),
        Ok(_) | Err(_) => true,
    }
}

/// JSON truthiness: `false`, `null`, `0`, and `""` are falsy
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Find emails with the default detector
pub fn find_emails(body: &str) -> Vec<String> {
    default_detector().find_emails(body)
}

/// Redact with the default detector and placeholder
pub fn redact(body: &str) -> String {
    default_detector().redact(body)
}
