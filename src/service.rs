//! Background decision service
//!
//! Owns the authoritative state transitions. Every inbound message is
//! validated, expired dismissals are pruned, and the message is dispatched
//! by kind. Scan requests always get a body back: the redacted text on
//! success, the original text on any failure, so the page's network call
//! is never left waiting.

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::detect::{is_final_request, EmailDetector};
use crate::error::{GuardError, Result};
use crate::message::{
    has_source_tag, kind_of, parse_inbound, Ack, InboundMessage, MessageKind, ScanRequest,
    ServiceResponse,
};
use crate::repository::StateRepository;
use crate::store::KvStore;
use crate::types::{is_dismissed, EmailEntry, HistorySnapshot, Issue};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outward notification that a user-facing alert should be shown
///
/// Implemented by the host. A failing sink never aborts the scan response.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, issue: &Issue) -> Result<()>;
}

/// Alert sink that only logs
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, issue: &Issue) -> Result<()> {
        tracing::info!(
            issue_id = %issue.id,
            undismissed = issue.undismissed().count(),
            "Alert required"
        );
        Ok(())
    }
}

/// Alert sink that forwards issues to a channel consumer
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Issue>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Issue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn notify(&self, issue: &Issue) -> Result<()> {
        self.tx
            .send(issue.clone())
            .map_err(|_| GuardError::Alert("alert receiver dropped".to_string()))
    }
}

/// Result of scanning one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Body to send onward; redacted whenever an email was found
    pub sanitized_body_text: String,
    pub is_final: bool,
    pub emails: Vec<String>,
    /// Recorded issue, present only for final requests with emails
    pub issue: Option<Issue>,
    /// True when this scan recorded a new issue with an email that is not dismissed
    pub alert_required: bool,
}

pub struct BackgroundService {
    repository: StateRepository,
    detector: EmailDetector,
    alerts: Arc<dyn AlertSink>,
    dismiss_hours: u32,
}

impl BackgroundService {
    /// Create a service on the wall clock
    pub fn new(
        store: Arc<dyn KvStore>,
        alerts: Arc<dyn AlertSink>,
        config: &GuardConfig,
    ) -> Result<Self> {
        Self::with_clock(store, alerts, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn KvStore>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        config: &GuardConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::debug!(store = store.name(), "Background service created");
        Ok(Self {
            repository: StateRepository::new(store, clock, config),
            detector: config.detector()?,
            alerts,
            dismiss_hours: config.dismiss_hours,
        })
    }

    pub fn repository(&self) -> &StateRepository {
        &self.repository
    }

    /// Handle one raw runtime message
    ///
    /// Returns `None` for values not tagged with our source. Everything
    /// else gets a response, including malformed messages.
    pub async fn handle_message(&self, raw: &Value) -> Option<ServiceResponse> {
        if !has_source_tag(raw) {
            return None;
        }

        let message = match parse_inbound(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "Rejected malformed message");
                return Some(fallback_response(raw, &err));
            }
        };

        let kind = message.kind();
        match self.dispatch(message).await {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::warn!(kind = %kind, error = %err, "Message dispatch failed");
                Some(fallback_response(raw, &err))
            }
        }
    }

    /// Prune expired dismissals, then act on a validated message
    pub async fn dispatch(&self, message: InboundMessage) -> Result<ServiceResponse> {
        self.repository.prune_expired_dismissals().await?;

        match message {
            InboundMessage::Scan(request) => {
                let outcome = self.scan(&request).await?;
                Ok(ServiceResponse::Sanitized(outcome.sanitized_body_text))
            }
            InboundMessage::DismissEmail { email, hours } => {
                self.dismiss_email(&email, hours).await?;
                Ok(ServiceResponse::Ack(Ack::ok()))
            }
            InboundMessage::GetHistory => Ok(ServiceResponse::History(self.history().await?)),
            InboundMessage::ClearHistory => {
                self.clear_history().await?;
                Ok(ServiceResponse::Ack(Ack::ok()))
            }
        }
    }

    /// Detect, redact, record, and decide whether to alert
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome> {
        let is_final = is_final_request(&request.body_text);
        let emails = self.detector.find_emails(&request.body_text);
        let sanitized_body_text = if emails.is_empty() {
            request.body_text.clone()
        } else {
            self.detector.redact(&request.body_text)
        };

        tracing::debug!(
            id = %request.id,
            url = %request.url,
            is_final,
            emails = emails.len(),
            "Scan request received"
        );

        if !is_final || emails.is_empty() {
            return Ok(ScanOutcome {
                sanitized_body_text,
                is_final,
                emails,
                issue: None,
                alert_required: false,
            });
        }

        let dismissed = self.repository.get_dismissed().await?;
        let now = self.repository.clock().now_millis();
        let issue = Issue {
            id: request.id.clone(),
            created_at: now,
            url: request.url.clone(),
            method: request.method.clone(),
            is_final,
            emails: emails
                .iter()
                .map(|email| EmailEntry {
                    email: email.clone(),
                    is_dismissed: is_dismissed(email, &dismissed, now),
                })
                .collect(),
        };
        let added = self.repository.append_issue(&issue).await?;

        // A retried id was already alerted on when first recorded
        let alert_required = added && issue.undismissed().next().is_some();
        if alert_required {
            if let Err(err) = self.alerts.notify(&issue).await {
                tracing::warn!(issue_id = %issue.id, error = %err, "Failed to present alert");
            }
        }

        Ok(ScanOutcome {
            sanitized_body_text,
            is_final,
            emails,
            issue: Some(issue),
            alert_required,
        })
    }

    /// Dismiss `email` for `hours` (configured default when `None`)
    pub async fn dismiss_email(&self, email: &str, hours: Option<u32>) -> Result<i64> {
        let hours = hours.unwrap_or(self.dismiss_hours);
        self.repository.dismiss_email(email, hours).await
    }

    pub async fn history(&self) -> Result<HistorySnapshot> {
        self.repository.history().await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.repository.clear_issues().await
    }
}

/// Scan requests fall back to their original body, everything else to a failed ack
fn fallback_response(raw: &Value, err: &GuardError) -> ServiceResponse {
    if kind_of(raw) == Some(MessageKind::ScanRequest) {
        let body = raw.get("bodyText").and_then(Value::as_str).unwrap_or_default();
        ServiceResponse::Sanitized(body.to_string())
    } else {
        ServiceResponse::Ack(Ack::failed(err.to_string()))
    }
}
