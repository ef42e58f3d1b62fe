//! Mailguard configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use crate::detect::{EmailDetector, EMAIL_PLACEHOLDER};
use crate::error::{GuardError, Result};
use crate::retry::RetryConfig;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Store key of the issue log document
pub const ISSUES_KEY: &str = "pm_issues";

/// Store key of the dismissal map document
pub const DISMISSED_KEY: &str = "pm_dismissed";

/// Conversation/message endpoints of the target chat service
pub fn default_target_url_patterns() -> Vec<String> {
    vec![
        r"://chatgpt\.com/backend-api/.*conversation".to_string(),
        r"://chatgpt\.com/backend-api/.*messages".to_string(),
        r"://chat\.openai\.com/backend-api/.*conversation".to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    /// URL regexes (case-insensitive) selecting intercepted requests
    #[serde(default = "default_target_url_patterns")]
    pub target_url_patterns: Vec<String>,

    /// How long the page waits for a sanitized body before sending the original
    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,

    /// Default dismissal horizon in hours
    #[serde(default = "default_dismiss_hours")]
    pub dismiss_hours: u32,

    /// Text substituted for each detected email
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_issues_key")]
    pub issues_key: String,

    #[serde(default = "default_dismissed_key")]
    pub dismissed_key: String,
}

fn default_relay_timeout_ms() -> u64 {
    1_500
}
fn default_dismiss_hours() -> u32 {
    24
}
fn default_placeholder() -> String {
    EMAIL_PLACEHOLDER.to_string()
}
fn default_issues_key() -> String {
    ISSUES_KEY.to_string()
}
fn default_dismissed_key() -> String {
    DISMISSED_KEY.to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            target_url_patterns: default_target_url_patterns(),
            relay_timeout_ms: default_relay_timeout_ms(),
            dismiss_hours: default_dismiss_hours(),
            placeholder: default_placeholder(),
            retry: RetryConfig::default(),
            issues_key: default_issues_key(),
            dismissed_key: default_dismissed_key(),
        }
    }
}

impl GuardConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GuardError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_timeout_ms == 0 {
            return Err(GuardError::Config("relayTimeoutMs must be > 0".to_string()));
        }
        if self.dismiss_hours == 0 {
            return Err(GuardError::Config("dismissHours must be > 0".to_string()));
        }
        if self.issues_key.is_empty() || self.dismissed_key.is_empty() {
            return Err(GuardError::Config("Store keys cannot be empty".to_string()));
        }
        if self.issues_key == self.dismissed_key {
            return Err(GuardError::Config(
                "issuesKey and dismissedKey must differ".to_string(),
            ));
        }
        self.url_matcher()?;
        self.detector()?;
        Ok(())
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }

    /// Compile the target URL allow-list
    pub fn url_matcher(&self) -> Result<RegexSet> {
        RegexSetBuilder::new(&self.target_url_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| GuardError::Pattern {
                pattern: self.target_url_patterns.join(" | "),
                reason: e.to_string(),
            })
    }

    pub fn detector(&self) -> Result<EmailDetector> {
        EmailDetector::new(self.placeholder.clone())
    }
}
