//! Page-context fetch interceptor
//!
//! [`SanitizingFetch`] wraps the page's network primitive. Matching calls
//! (target URL, POST, JSON content type, non-empty text body) are paused
//! while the body round-trips through the relay, then resumed with the
//! sanitized text. Everything else, and any failure along the way, goes to
//! the wrapped primitive with the caller's original arguments.
//!
//! [`RelayClient`] owns the pending-correlation table. Each in-flight
//! request is resolved exactly once: by a matching response message or by
//! the timeout, whichever removes the table entry first. An entry is also
//! removed when its waiting call ends any other way.

use crate::config::GuardConfig;
use crate::error::Result;
use crate::message::{ScanRequest, ScanResponse};
use crate::window::{PagePort, WindowBus};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{select, Either};
use futures::FutureExt;
use regex::RegexSet;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const JSON_CONTENT_TYPE: &str = "application/json";

// ─── Request model ───────────────────────────────────────────────

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every header named `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A structured request object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestObject {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl RequestObject {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body as UTF-8 text; borrows, so the request stays usable
    pub fn text(&self) -> Option<String> {
        let body = self.body.as_ref()?;
        std::str::from_utf8(body).ok().map(str::to_string)
    }
}

/// First argument of a fetch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchInput {
    Url(String),
    Request(RequestObject),
}

impl FetchInput {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Request(request) => &request.url,
        }
    }
}

impl From<&str> for FetchInput {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for FetchInput {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<RequestObject> for FetchInput {
    fn from(request: RequestObject) -> Self {
        Self::Request(request)
    }
}

/// Body passed in fetch options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    /// Binary or form payloads; never inspected
    Binary(Bytes),
}

/// Second argument of a fetch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchInit {
    pub method: Option<String>,
    pub headers: Option<Headers>,
    pub body: Option<RequestBody>,
}

impl FetchInit {
    pub fn post_json(body: impl Into<String>) -> Self {
        Self {
            method: Some("POST".to_string()),
            headers: Some([("Content-Type", JSON_CONTENT_TYPE)].into_iter().collect()),
            body: Some(RequestBody::Text(body.into())),
        }
    }
}

/// The network primitive being wrapped
///
/// Associated types let a wrapper resolve or reject exactly as the
/// primitive it wraps.
#[async_trait]
pub trait Fetch: Send + Sync {
    type Response: Send;
    type Error: Send;

    async fn fetch(
        &self,
        input: FetchInput,
        init: Option<FetchInit>,
    ) -> std::result::Result<Self::Response, Self::Error>;
}

// ─── Relay client ────────────────────────────────────────────────

type PendingTable = HashMap<String, oneshot::Sender<String>>;

/// Page-side end of the relay: posts scan requests, awaits responses
pub struct RelayClient {
    pending: Mutex<PendingTable>,
    port: Arc<dyn PagePort>,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(port: Arc<dyn PagePort>, timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            port,
            timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests still waiting for a response or timeout
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Resolve a pending request from a window message
    ///
    /// Returns `true` if the message settled a request. Responses for
    /// unknown or already-settled ids are ignored.
    pub fn handle_window_message(&self, raw: &Value) -> bool {
        let Some(response) = ScanResponse::from_message(raw) else {
            return false;
        };
        let Some(tx) = self.pending().remove(&response.id) else {
            tracing::debug!(id = %response.id, "Late or unknown scan response ignored");
            return false;
        };
        tx.send(response.sanitized_body_text).is_ok()
    }

    /// Relay `body_text` for sanitization, falling back to it on timeout
    ///
    /// The pending entry never outlives this call, even when the post
    /// panics or the caller drops the future mid-wait.
    pub async fn request_sanitized_body(&self, url: &str, method: &str, body_text: &str) -> String {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry::register(self, tx);

        let request = ScanRequest {
            id: entry.id.clone(),
            url: url.to_string(),
            method: method.to_string(),
            body_text: body_text.to_string(),
        };
        self.port.post_message(request.to_message());

        let sleep = tokio::time::sleep(self.timeout);
        futures::pin_mut!(sleep);

        match select(rx, sleep).await {
            Either::Left((Ok(sanitized), _)) => sanitized,
            Either::Left((Err(_), _)) => body_text.to_string(),
            Either::Right(((), mut rx)) => {
                if entry.release() {
                    tracing::warn!(
                        id = %entry.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Relay timed out, sending original body"
                    );
                    return body_text.to_string();
                }
                // The response removed the entry first, so it wins
                rx.try_recv().unwrap_or_else(|_| body_text.to_string())
            }
        }
    }

    /// Settle pending requests from every response posted on the window
    pub fn spawn_listener(self: &Arc<Self>, bus: &WindowBus) -> JoinHandle<()> {
        let client = Arc::clone(self);
        bus.spawn_listener(move |message| {
            let client = Arc::clone(&client);
            async move {
                client.handle_window_message(&message);
            }
        })
    }
}

/// A registered correlation id, removed from the table on drop
struct PendingEntry<'a> {
    client: &'a RelayClient,
    id: String,
}

impl<'a> PendingEntry<'a> {
    fn register(client: &'a RelayClient, tx: oneshot::Sender<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        client.pending().insert(id.clone(), tx);
        Self { client, id }
    }

    /// Remove the entry now; `false` if a response already took it
    fn release(&self) -> bool {
        self.client.pending().remove(&self.id).is_some()
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// ─── Fetch wrapper ───────────────────────────────────────────────

/// Fetch wrapper that redacts outgoing chat request bodies
pub struct SanitizingFetch<F> {
    inner: F,
    client: Arc<RelayClient>,
    targets: RegexSet,
}

impl<F: Fetch> SanitizingFetch<F> {
    pub fn new(inner: F, client: Arc<RelayClient>, config: &GuardConfig) -> Result<Self> {
        Ok(Self {
            inner,
            client,
            targets: config.url_matcher()?,
        })
    }

    /// Wire a wrapper onto a window bus
    ///
    /// Returns the wrapper and the listener task that settles responses.
    pub fn attach(inner: F, bus: &WindowBus, config: &GuardConfig) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;
        let client = Arc::new(RelayClient::new(Arc::new(bus.clone()), config.relay_timeout()));
        let listener = client.spawn_listener(bus);
        Ok((Self::new(inner, client, config)?, listener))
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn client(&self) -> &Arc<RelayClient> {
        &self.client
    }

    pub fn is_target(&self, url: &str) -> bool {
        self.targets.is_match(url)
    }

    /// Rebuilt arguments for a matching call, `None` to pass through
    async fn prepare(
        &self,
        input: &FetchInput,
        init: Option<&FetchInit>,
    ) -> Option<(FetchInput, Option<FetchInit>)> {
        let url = input.url();
        if !self.is_target(url) {
            return None;
        }

        let method = normalize_method(input, init);
        let content_type = content_type(input, init);
        if method != "POST" || !content_type.to_ascii_lowercase().contains(JSON_CONTENT_TYPE) {
            return None;
        }

        let init_text = match init.and_then(|i| i.body.as_ref()) {
            Some(RequestBody::Text(text)) => Some(text.clone()),
            _ => None,
        };
        let from_init = init_text.is_some();
        let body_text = match (init_text, input) {
            (Some(text), _) => text,
            (None, FetchInput::Request(request)) => request.text()?,
            (None, FetchInput::Url(_)) => return None,
        };
        if body_text.is_empty() {
            return None;
        }

        let sanitized = self
            .client
            .request_sanitized_body(url, &method, &body_text)
            .await;
        if sanitized != body_text {
            tracing::debug!(url, "Outgoing body sanitized");
        }

        if from_init {
            let mut init = init.cloned().unwrap_or_default();
            init.body = Some(RequestBody::Text(sanitized));
            return Some((input.clone(), Some(init)));
        }

        let FetchInput::Request(request) = input else {
            return None;
        };
        let mut rebuilt = request.clone();
        if !rebuilt.headers.contains("content-type") {
            rebuilt.headers.set("content-type", JSON_CONTENT_TYPE);
        }
        rebuilt.body = Some(Bytes::from(sanitized));
        // The rebuilt request carries the body; options must not override it
        let init = init.cloned().map(|i| FetchInit { body: None, ..i });
        Some((FetchInput::Request(rebuilt), init))
    }
}

#[async_trait]
impl<F: Fetch> Fetch for SanitizingFetch<F> {
    type Response = F::Response;
    type Error = F::Error;

    async fn fetch(
        &self,
        input: FetchInput,
        init: Option<FetchInit>,
    ) -> std::result::Result<Self::Response, Self::Error> {
        let prepared = AssertUnwindSafe(self.prepare(&input, init.as_ref()))
            .catch_unwind()
            .await;

        match prepared {
            Ok(Some((input, init))) => self.inner.fetch(input, init).await,
            Ok(None) => self.inner.fetch(input, init).await,
            Err(_) => {
                tracing::error!(url = input.url(), "Interceptor failed, sending original request");
                self.inner.fetch(input, init).await
            }
        }
    }
}

/// Upper-cased method: options first, then the request, else GET
fn normalize_method(input: &FetchInput, init: Option<&FetchInit>) -> String {
    if let Some(method) = init.and_then(|i| i.method.as_deref()).filter(|m| !m.is_empty()) {
        return method.to_uppercase();
    }
    match input {
        FetchInput::Request(request) if !request.method.is_empty() => request.method.to_uppercase(),
        _ => "GET".to_string(),
    }
}

/// Content type from option headers when given, else from the request
fn content_type<'a>(input: &'a FetchInput, init: Option<&'a FetchInit>) -> &'a str {
    let headers = match (init.and_then(|i| i.headers.as_ref()), input) {
        (Some(headers), _) => Some(headers),
        (None, FetchInput::Request(request)) => Some(&request.headers),
        (None, FetchInput::Url(_)) => None,
    };
    headers.and_then(|h| h.get("content-type")).unwrap_or_default()
}
