//! Error types for a3s-mailguard

use thiserror::Error;

/// Errors that can occur while relaying, scanning, or persisting
#[derive(Debug, Error)]
pub enum GuardError {
    /// Key-value store read or write failure
    #[error("Store error on key '{key}': {reason}")]
    Store { key: String, reason: String },

    /// A write landed but the re-read did not show the expected state
    #[error("Verification failed for '{operation}': {reason}")]
    Verification { operation: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted document has an unsupported shape or version
    #[error("Document error on key '{key}': {reason}")]
    Document { key: String, reason: String },

    /// Inbound message failed schema validation
    #[error("Invalid {kind} message: {reason}")]
    Validation { kind: String, reason: String },

    /// Cross-context delivery failure or missing response
    #[error("Transport error: {0}")]
    Transport(String),

    /// The background service answered with a failed acknowledgement
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid regular expression
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// The alert surface could not be presented
    #[error("Alert delivery failed: {0}")]
    Alert(String),
}

impl GuardError {
    /// Whether the repository retry loop should attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Verification { .. })
    }

    pub(crate) fn store(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Store {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn verification(operation: &str, reason: impl Into<String>) -> Self {
        Self::Verification {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(kind: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for mailguard operations
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GuardError::store("pm_issues", "quota exceeded").is_retryable());
        assert!(GuardError::verification("append_issue", "missing").is_retryable());
        assert!(!GuardError::Transport("closed".into()).is_retryable());
        assert!(!GuardError::validation("DISMISS_EMAIL", "empty email").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = GuardError::store("pm_dismissed", "disk full");
        assert_eq!(err.to_string(), "Store error on key 'pm_dismissed': disk full");
    }
}
