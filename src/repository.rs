//! Durable state repository
//!
//! Typed access to the two persisted records, the append-only issue log
//! and the dismissal map, on top of an unreliable [`KvStore`].
//!
//! Every mutation runs under retry-with-verification: perform the write,
//! read the record back, and confirm the expected state is observable.
//! Store errors and failed verifications are retried with exponential
//! backoff; once attempts are exhausted the last error is returned.
//!
//! There is no lock across read-modify-write. Overlapping writers may
//! interleave; the issue log relies on id idempotence and the dismissal
//! map is last-writer-wins.

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::detect::normalize_email;
use crate::document;
use crate::error::{GuardError, Result};
use crate::retry::{verify, with_retry, RetryConfig};
use crate::store::KvStore;
use crate::types::{DismissalMap, HistorySnapshot, Issue, MILLIS_PER_HOUR};
use std::sync::Arc;

pub struct StateRepository {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    issues_key: String,
    dismissed_key: String,
}

impl StateRepository {
    /// Create a repository with keys and retry policy from `config`
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &GuardConfig) -> Self {
        Self {
            store,
            clock,
            retry: config.retry.clone(),
            issues_key: config.issues_key.clone(),
            dismissed_key: config.dismissed_key.clone(),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ─── Issue log ───────────────────────────────────────────────

    pub async fn get_issues(&self) -> Result<Vec<Issue>> {
        let value = self.store.get(&self.issues_key).await?;
        document::decode_issue_log(&self.issues_key, value)
    }

    async fn put_issues(&self, issues: &[Issue]) -> Result<()> {
        let value = document::encode_issue_log(issues)?;
        self.store.set(&self.issues_key, value).await
    }

    /// Append an issue; a no-op when an issue with the same id exists
    ///
    /// Returns `true` if this call added the issue.
    pub async fn append_issue(&self, issue: &Issue) -> Result<bool> {
        with_retry(&self.retry, "append_issue", |_| self.try_append_issue(issue)).await
    }

    async fn try_append_issue(&self, issue: &Issue) -> Result<bool> {
        let mut issues = self.get_issues().await?;
        if issues.iter().any(|i| i.id == issue.id) {
            tracing::debug!(issue_id = %issue.id, "Issue already recorded");
            return Ok(false);
        }

        issues.push(issue.clone());
        self.put_issues(&issues).await?;

        let stored = self.get_issues().await?;
        verify(
            stored.iter().any(|i| i.id == issue.id),
            "append_issue",
            "issue missing after write",
        )?;

        tracing::info!(
            issue_id = %issue.id,
            emails = issue.emails.len(),
            total = stored.len(),
            "Issue recorded"
        );
        Ok(true)
    }

    /// Truncate the issue log; dismissals are untouched
    pub async fn clear_issues(&self) -> Result<()> {
        with_retry(&self.retry, "clear_issues", |_| async move {
            self.put_issues(&[]).await?;
            let stored = self.get_issues().await?;
            verify(stored.is_empty(), "clear_issues", "issue log not empty after write")
        })
        .await?;
        tracing::info!("Issue history cleared");
        Ok(())
    }

    // ─── Dismissals ──────────────────────────────────────────────

    pub async fn get_dismissed(&self) -> Result<DismissalMap> {
        let value = self.store.get(&self.dismissed_key).await?;
        document::decode_dismissals(&self.dismissed_key, value)
    }

    /// Replace the whole dismissal map
    pub async fn set_dismissed(&self, dismissed: &DismissalMap) -> Result<()> {
        with_retry(&self.retry, "set_dismissed", |_| async move {
            self.put_dismissed(dismissed).await?;
            let stored = self.get_dismissed().await?;
            verify(&stored == dismissed, "set_dismissed", "dismissal map differs after write")
        })
        .await
    }

    async fn put_dismissed(&self, dismissed: &DismissalMap) -> Result<()> {
        let value = document::encode_dismissals(dismissed)?;
        self.store.set(&self.dismissed_key, value).await
    }

    /// Suppress alerts for `email` for `hours` from now
    ///
    /// Returns the expiry written, in Unix milliseconds.
    pub async fn dismiss_email(&self, email: &str, hours: u32) -> Result<i64> {
        let normalized = normalize_email(email);
        if normalized.is_empty() {
            return Err(GuardError::validation("DISMISS_EMAIL", "email is empty"));
        }
        let key = normalized.as_str();
        let until = self.clock.now_millis() + i64::from(hours) * MILLIS_PER_HOUR;

        with_retry(&self.retry, "dismiss_email", |_| async move {
            let mut dismissed = self.get_dismissed().await?;
            dismissed.insert(key.to_string(), until);
            self.put_dismissed(&dismissed).await?;

            let stored = self.get_dismissed().await?;
            verify(
                stored.get(key) == Some(&until),
                "dismiss_email",
                "dismissal entry missing after write",
            )
        })
        .await?;

        tracing::info!(email = %key, until, hours, "Email dismissed");
        Ok(until)
    }

    /// Drop entries whose expiry is at or before now
    ///
    /// Writes only when something was removed. Returns the number removed.
    pub async fn prune_expired_dismissals(&self) -> Result<usize> {
        with_retry(&self.retry, "prune_expired_dismissals", |_| async move {
            let now = self.clock.now_millis();
            let mut dismissed = self.get_dismissed().await?;
            let before = dismissed.len();
            dismissed.retain(|_, until| *until > now);
            let removed = before - dismissed.len();
            if removed == 0 {
                return Ok(0);
            }

            self.put_dismissed(&dismissed).await?;
            let stored = self.get_dismissed().await?;
            verify(
                stored.values().all(|until| *until > now),
                "prune_expired_dismissals",
                "expired entries present after write",
            )?;

            tracing::debug!(removed, remaining = dismissed.len(), "Expired dismissals pruned");
            Ok(removed)
        })
        .await
    }

    /// Issue log plus dismissal map, read-only
    pub async fn history(&self) -> Result<HistorySnapshot> {
        Ok(HistorySnapshot {
            issues: self.get_issues().await?,
            dismissed: self.get_dismissed().await?,
        })
    }
}
