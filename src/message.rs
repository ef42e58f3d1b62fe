//! Cross-context message contract
//!
//! Every message carries the shared `source` tag and a `kind` from a
//! closed set. Inbound values arrive as untyped JSON from other contexts
//! and are validated here before anything acts on them.

use crate::error::{GuardError, Result};
use crate::types::HistorySnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Source discriminator shared by all contexts
pub const MESSAGE_SOURCE: &str = "pii-mask";

/// Closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    ScanRequest,
    ScanResponse,
    GetHistory,
    DismissEmail,
    ClearHistory,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanRequest => "SCAN_REQUEST",
            Self::ScanResponse => "SCAN_RESPONSE",
            Self::GetHistory => "GET_HISTORY",
            Self::DismissEmail => "DISMISS_EMAIL",
            Self::ClearHistory => "CLEAR_HISTORY",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "SCAN_REQUEST" => Some(Self::ScanRequest),
            "SCAN_RESPONSE" => Some(Self::ScanResponse),
            "GET_HISTORY" => Some(Self::GetHistory),
            "DISMISS_EMAIL" => Some(Self::DismissEmail),
            "CLEAR_HISTORY" => Some(Self::ClearHistory),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request body awaiting sanitization; lives for one relay round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Correlation id, unique per in-flight request
    pub id: String,
    pub url: String,
    pub method: String,
    pub body_text: String,
}

impl ScanRequest {
    /// Wire form including source tag and kind
    pub fn to_message(&self) -> Value {
        json!({
            "source": MESSAGE_SOURCE,
            "kind": MessageKind::ScanRequest,
            "id": self.id,
            "url": self.url,
            "method": self.method,
            "bodyText": self.body_text,
        })
    }
}

/// Sanitized body delivered back to the page, keyed by correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub id: String,
    pub sanitized_body_text: String,
}

impl ScanResponse {
    pub fn to_message(&self) -> Value {
        json!({
            "source": MESSAGE_SOURCE,
            "kind": MessageKind::ScanResponse,
            "id": self.id,
            "sanitizedBodyText": self.sanitized_body_text,
        })
    }

    /// Accept a window message only if it is a tagged response with an id
    ///
    /// A missing or non-string body is read as empty text.
    pub fn from_message(value: &Value) -> Option<Self> {
        if !has_source_tag(value) || kind_of(value) != Some(MessageKind::ScanResponse) {
            return None;
        }
        let id = value.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())?;
        let sanitized_body_text = value
            .get("sanitizedBodyText")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Self {
            id: id.to_string(),
            sanitized_body_text: sanitized_body_text.to_string(),
        })
    }
}

/// A validated message for the background service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Scan(ScanRequest),
    DismissEmail { email: String, hours: Option<u32> },
    GetHistory,
    ClearHistory,
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Scan(_) => MessageKind::ScanRequest,
            Self::DismissEmail { .. } => MessageKind::DismissEmail,
            Self::GetHistory => MessageKind::GetHistory,
            Self::ClearHistory => MessageKind::ClearHistory,
        }
    }

    /// Wire form including source tag and kind
    pub fn to_message(&self) -> Value {
        match self {
            Self::Scan(request) => request.to_message(),
            Self::DismissEmail { email, hours } => {
                let mut message = json!({
                    "source": MESSAGE_SOURCE,
                    "kind": MessageKind::DismissEmail,
                    "email": email,
                });
                if let Some(hours) = hours {
                    message["hours"] = json!(hours);
                }
                message
            }
            Self::GetHistory | Self::ClearHistory => json!({
                "source": MESSAGE_SOURCE,
                "kind": self.kind(),
            }),
        }
    }
}

/// Acknowledgement for administrative operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// What the background service sends back
///
/// Serializes untagged: a bare string for scans, `{ok}` for acks,
/// `{issues, dismissed}` for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServiceResponse {
    Sanitized(String),
    Ack(Ack),
    History(HistorySnapshot),
}

impl ServiceResponse {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Sanitized(text) => Value::String(text.clone()),
            Self::Ack(ack) => json!(ack),
            Self::History(snapshot) => json!(snapshot),
        }
    }
}

/// Whether the value is an object tagged with our source
pub fn has_source_tag(value: &Value) -> bool {
    value.get("source").and_then(Value::as_str) == Some(MESSAGE_SOURCE)
}

/// Recognized kind of a message, if any
pub fn kind_of(value: &Value) -> Option<MessageKind> {
    value.get("kind").and_then(Value::as_str).and_then(MessageKind::parse)
}

fn require_str<'a>(value: &'a Value, field: &str, kind: MessageKind) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GuardError::validation(kind.as_str(), format!("'{}' must be a string", field)))
}

/// Validate an inbound background message
pub fn parse_inbound(value: &Value) -> Result<InboundMessage> {
    if !value.is_object() {
        return Err(GuardError::validation("unknown", "message must be an object"));
    }
    if !has_source_tag(value) {
        return Err(GuardError::validation("unknown", "missing or foreign source tag"));
    }
    let raw_kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| GuardError::validation("unknown", "'kind' must be a string"))?;
    let kind = MessageKind::parse(raw_kind)
        .ok_or_else(|| GuardError::validation(raw_kind, "unknown message kind"))?;

    match kind {
        MessageKind::ScanRequest => Ok(InboundMessage::Scan(ScanRequest {
            id: require_str(value, "id", kind)?.to_string(),
            url: require_str(value, "url", kind)?.to_string(),
            method: require_str(value, "method", kind)?.to_string(),
            body_text: require_str(value, "bodyText", kind)?.to_string(),
        })),
        MessageKind::DismissEmail => {
            let email = require_str(value, "email", kind)?;
            if email.trim().is_empty() {
                return Err(GuardError::validation(kind.as_str(), "'email' cannot be empty"));
            }
            let hours = match value.get("hours") {
                None | Some(Value::Null) => None,
                Some(h) => Some(
                    h.as_u64()
                        .filter(|h| *h > 0)
                        .and_then(|h| u32::try_from(h).ok())
                        .ok_or_else(|| {
                            GuardError::validation(kind.as_str(), "'hours' must be a positive integer")
                        })?,
                ),
            };
            Ok(InboundMessage::DismissEmail {
                email: email.to_string(),
                hours,
            })
        }
        MessageKind::GetHistory => Ok(InboundMessage::GetHistory),
        MessageKind::ClearHistory => Ok(InboundMessage::ClearHistory),
        MessageKind::ScanResponse => Err(GuardError::validation(
            kind.as_str(),
            "responses are delivered to the page, not the background",
        )),
    }
}
