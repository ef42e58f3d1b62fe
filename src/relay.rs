//! Content relay and runtime messaging
//!
//! The content context sits between the page and the background service.
//! It accepts tagged scan requests from the window, forwards them over the
//! runtime channel, and posts the sanitized body back under the same
//! correlation id. A transport fault answers with the original body so the
//! page is never blocked by a broken relay.

use crate::error::{GuardError, Result};
use crate::message::{has_source_tag, kind_of, Ack, InboundMessage, MessageKind, ScanResponse};
use crate::service::BackgroundService;
use crate::types::HistorySnapshot;
use crate::window::{PagePort, WindowBus};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Request/response call into the background context
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, message: Value) -> Result<Value>;
}

/// Relay that calls a background service in the same process
pub struct LocalRelay {
    service: Arc<BackgroundService>,
}

impl LocalRelay {
    pub fn new(service: Arc<BackgroundService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Relay for LocalRelay {
    async fn send(&self, message: Value) -> Result<Value> {
        self.service
            .handle_message(&message)
            .await
            .map(|response| response.to_value())
            .ok_or_else(|| GuardError::Transport("no response from background".to_string()))
    }
}

/// Bridge from page window messages to the background relay
pub struct ContentRelay {
    relay: Arc<dyn Relay>,
}

impl ContentRelay {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self { relay }
    }

    /// Forward one page message; `None` if it is not a well-formed scan request
    pub async fn handle_page_message(&self, raw: &Value) -> Option<ScanResponse> {
        if !has_source_tag(raw) || kind_of(raw) != Some(MessageKind::ScanRequest) {
            return None;
        }
        let id = raw.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())?;
        let body_text = raw.get("bodyText").and_then(Value::as_str)?;

        let sanitized_body_text = match self.relay.send(raw.clone()).await {
            Ok(Value::String(sanitized)) => sanitized,
            Ok(other) => {
                tracing::warn!(id, response = %other, "Unexpected scan response, using original body");
                body_text.to_string()
            }
            Err(err) => {
                tracing::warn!(id, error = %err, "Relay failed, using original body");
                body_text.to_string()
            }
        };

        Some(ScanResponse {
            id: id.to_string(),
            sanitized_body_text,
        })
    }

    /// Listen on the window and answer every scan request on it
    pub fn spawn(self: Arc<Self>, bus: WindowBus) -> JoinHandle<()> {
        let port = bus.clone();
        bus.spawn_listener(move |message| {
            let relay = Arc::clone(&self);
            let port = port.clone();
            async move {
                if let Some(response) = relay.handle_page_message(&message).await {
                    port.post_message(response.to_message());
                }
            }
        })
    }
}

/// Typed history and dismissal API for the presentation layer
pub struct HistoryClient {
    relay: Arc<dyn Relay>,
}

impl HistoryClient {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self { relay }
    }

    async fn call(&self, message: InboundMessage) -> Result<Value> {
        let response = self.relay.send(message.to_message()).await?;
        if let Ok(ack) = serde_json::from_value::<Ack>(response.clone()) {
            if !ack.ok {
                return Err(GuardError::Rejected(
                    ack.error.unwrap_or_else(|| format!("{} failed", message.kind())),
                ));
            }
        }
        Ok(response)
    }

    pub async fn get_history(&self) -> Result<HistorySnapshot> {
        let response = self.call(InboundMessage::GetHistory).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Dismiss with the service's default horizon
    pub async fn dismiss_email(&self, email: &str) -> Result<()> {
        self.dismiss_email_for(email, None).await
    }

    pub async fn dismiss_email_for(&self, email: &str, hours: Option<u32>) -> Result<()> {
        self.call(InboundMessage::DismissEmail {
            email: email.to_string(),
            hours,
        })
        .await
        .map(|_| ())
    }

    /// Clear the issue log; dismissals are kept
    pub async fn clear_history(&self) -> Result<()> {
        self.call(InboundMessage::ClearHistory).await.map(|_| ())
    }
}
