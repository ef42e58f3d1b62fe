//! # a3s-mailguard
//!
//! Outbound chat request interception, email redaction, and a dismissible
//! issue history for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-mailguard` sits between a chat page and the network. Outgoing
//! conversation requests are relayed to a background service that masks
//! email addresses, records an issue when a finished request carried any,
//! and answers with the sanitized body. Every failure along the way sends
//! the user's original request instead of blocking it.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_mailguard::{BackgroundService, GuardConfig, LogAlertSink, MemoryStore, ScanRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_mailguard::Result<()> {
//! let service = BackgroundService::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(LogAlertSink),
//!     &GuardConfig::default(),
//! )?;
//!
//! let outcome = service
//!     .scan(&ScanRequest {
//!         id: "req-1".to_string(),
//!         url: "https://chatgpt.com/backend-api/conversation".to_string(),
//!         method: "POST".to_string(),
//!         body_text: r#"{"q":"mail me at x@y.com"}"#.to_string(),
//!     })
//!     .await?;
//!
//! assert_eq!(outcome.sanitized_body_text, r#"{"q":"mail me at [EMAIL_REDACTED]"}"#);
//! # Ok(())
//! # }
//! ```
//!
//! ## Contexts
//!
//! - **interceptor**: wraps the page's fetch and waits on the relay with a timeout
//! - **relay**: content-side bridge from window messages to the background
//! - **service**: redaction and issue history
//!
//! ## Architecture
//!
//! - **KvStore** trait: persistence backend (memory or JSON file)
//! - **StateRepository**: versioned documents with verified, retried writes
//! - **Relay** trait: request/response call into the background context
//! - **Fetch** trait: the network primitive the interceptor wraps
//! - **AlertSink** trait: where issue notifications go

pub mod clock;
pub mod config;
pub mod detect;
pub mod document;
pub mod error;
pub mod interceptor;
pub mod message;
pub mod relay;
pub mod repository;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;
pub mod window;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use detect::{EmailDetector, EMAIL_PLACEHOLDER};
pub use error::{GuardError, Result};
pub use interceptor::{
    Fetch, FetchInit, FetchInput, Headers, RelayClient, RequestBody, RequestObject,
    SanitizingFetch,
};
pub use message::{
    Ack, InboundMessage, MessageKind, ScanRequest, ScanResponse, ServiceResponse, MESSAGE_SOURCE,
};
pub use relay::{ContentRelay, HistoryClient, LocalRelay, Relay};
pub use repository::StateRepository;
pub use retry::RetryConfig;
pub use service::{AlertSink, BackgroundService, ChannelAlertSink, LogAlertSink, ScanOutcome};
pub use store::{FileStore, KvStore, MemoryStore};
pub use types::{DismissalMap, DismissalStatus, EmailEntry, HistorySnapshot, Issue};
pub use window::{PagePort, WindowBus};
