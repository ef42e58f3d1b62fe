//! End-to-end mailguard tests
//!
//! Wires the page interceptor, the window bus, the content relay, and the
//! background service together. Covers redaction on the wire, issue
//! recording, relay timeouts, dismissals, pruning, and file persistence.

use a3s_mailguard::types::MILLIS_PER_HOUR;
use a3s_mailguard::{
    BackgroundService, ChannelAlertSink, ContentRelay, Fetch, FetchInit, FetchInput, FileStore,
    GuardConfig, GuardError, HistoryClient, Issue, KvStore, LocalRelay, ManualClock, MemoryStore,
    RequestBody, RetryConfig, SanitizingFetch, ScanRequest, WindowBus,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const URL: &str = "https://chatgpt.com/backend-api/conversation";
const T0: i64 = 1_700_000_000_000;

#[derive(Default)]
struct RecordingFetch {
    calls: Mutex<Vec<(FetchInput, Option<FetchInit>)>>,
}

impl RecordingFetch {
    fn sent_body(&self, index: usize) -> Option<RequestBody> {
        let calls = self.calls.lock().unwrap();
        calls[index].1.as_ref().and_then(|init| init.body.clone())
    }
}

#[async_trait]
impl Fetch for RecordingFetch {
    type Response = u16;
    type Error = String;

    async fn fetch(&self, input: FetchInput, init: Option<FetchInit>) -> Result<u16, String> {
        self.calls.lock().unwrap().push((input, init));
        Ok(200)
    }
}

struct Harness {
    fetch: SanitizingFetch<RecordingFetch>,
    service: Arc<BackgroundService>,
    clock: Arc<ManualClock>,
    alerts: mpsc::UnboundedReceiver<Issue>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn harness(store: Arc<dyn KvStore>, with_relay: bool) -> Harness {
    let config = GuardConfig::default();
    let clock = Arc::new(ManualClock::new(T0));
    let (sink, alerts) = ChannelAlertSink::new();
    let service = Arc::new(
        BackgroundService::with_clock(store, Arc::new(sink), clock.clone(), &config).unwrap(),
    );

    let bus = WindowBus::default();
    let mut tasks = Vec::new();
    if with_relay {
        let relay = Arc::new(ContentRelay::new(Arc::new(LocalRelay::new(service.clone()))));
        tasks.push(relay.spawn(bus.clone()));
    }
    let (fetch, listener) = SanitizingFetch::attach(RecordingFetch::default(), &bus, &config).unwrap();
    tasks.push(listener);

    Harness {
        fetch,
        service,
        clock,
        alerts,
        tasks,
    }
}

fn text(body: &str) -> Option<RequestBody> {
    Some(RequestBody::Text(body.to_string()))
}

// ─── Interception pipeline ───────────────────────────────────────

#[tokio::test]
async fn test_final_request_is_redacted_and_recorded() {
    let mut h = harness(Arc::new(MemoryStore::new()), true);

    let status = h
        .fetch
        .fetch(URL.into(), Some(FetchInit::post_json(r#"{"q":"hi x@y.com"}"#)))
        .await;
    assert_eq!(status, Ok(200));
    assert_eq!(h.fetch.inner().sent_body(0), text(r#"{"q":"hi [EMAIL_REDACTED]"}"#));

    let history = h.service.history().await.unwrap();
    assert_eq!(history.issues.len(), 1);
    let issue = &history.issues[0];
    assert!(issue.is_final);
    assert_eq!(issue.url, URL);
    assert_eq!(issue.method, "POST");
    assert_eq!(issue.created_at, T0);
    assert_eq!(issue.emails.len(), 1);
    assert_eq!(issue.emails[0].email, "x@y.com");
    assert!(!issue.emails[0].is_dismissed);

    let alerted = h.alerts.recv().await.unwrap();
    assert_eq!(alerted.id, issue.id);
}

#[tokio::test]
async fn test_partial_request_is_redacted_without_issue() {
    let mut h = harness(Arc::new(MemoryStore::new()), true);

    h.fetch
        .fetch(URL.into(), Some(FetchInit::post_json(r#"{"partial_query":"x@y.com"}"#)))
        .await
        .unwrap();

    assert_eq!(h.fetch.inner().sent_body(0), text(r#"{"partial_query":"[EMAIL_REDACTED]"}"#));
    assert!(h.service.history().await.unwrap().issues.is_empty());
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_clean_request_leaves_no_trace() {
    let h = harness(Arc::new(MemoryStore::new()), true);
    let body = r#"{"q":"what is the weather"}"#;

    h.fetch.fetch(URL.into(), Some(FetchInit::post_json(body))).await.unwrap();

    assert_eq!(h.fetch.inner().sent_body(0), text(body));
    assert!(h.service.history().await.unwrap().issues.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_relay_sends_original_after_timeout() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    let body = r#"{"q":"x@y.com"}"#;

    let started = tokio::time::Instant::now();
    h.fetch.fetch(URL.into(), Some(FetchInit::post_json(body))).await.unwrap();

    assert!(started.elapsed() >= std::time::Duration::from_millis(1_500));
    assert_eq!(h.fetch.inner().sent_body(0), text(body));
    assert_eq!(h.fetch.client().pending_count(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let h = harness(Arc::new(MemoryStore::new()), true);

    let requests = (0..8).map(|i| {
        let body = format!(r#"{{"partial_query":"user{}@example.com #{}"}}"#, i, i);
        h.fetch.fetch(URL.into(), Some(FetchInit::post_json(body)))
    });
    for status in futures::future::join_all(requests).await {
        assert_eq!(status, Ok(200));
    }

    let calls = h.fetch.inner().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 8);
    for (_, init) in calls {
        let Some(RequestBody::Text(body)) = init.and_then(|i| i.body) else {
            panic!("expected text body");
        };
        let value: Value = serde_json::from_str(&body).unwrap();
        let partial = value["partial_query"].as_str().unwrap();
        assert!(partial.starts_with("[EMAIL_REDACTED] #"), "{}", partial);
    }
    assert_eq!(h.fetch.client().pending_count(), 0);
}

// ─── Dismissals ──────────────────────────────────────────────────

#[tokio::test]
async fn test_dismissal_uses_normalized_key_and_default_horizon() {
    let service = BackgroundService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(a3s_mailguard::LogAlertSink),
        &GuardConfig::default(),
    )
    .unwrap();

    let before = chrono::Utc::now().timestamp_millis();
    let until = tokio_test::assert_ok!(service.dismiss_email("A@B.com", None).await);

    let dismissed = service.history().await.unwrap().dismissed;
    assert_eq!(dismissed.get("a@b.com"), Some(&until));
    assert!(!dismissed.contains_key("A@B.com"));
    assert!((until - (before + 24 * MILLIS_PER_HOUR)).abs() < 1_000);
}

#[tokio::test]
async fn test_dismissed_email_is_recorded_but_not_alerted() {
    let mut h = harness(Arc::new(MemoryStore::new()), true);
    h.service.dismiss_email("x@y.com", Some(1)).await.unwrap();

    h.fetch
        .fetch(URL.into(), Some(FetchInit::post_json(r#"{"q":"X@Y.com"}"#)))
        .await
        .unwrap();

    let history = h.service.history().await.unwrap();
    assert_eq!(history.issues.len(), 1);
    assert!(history.issues[0].emails[0].is_dismissed);
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_expired_dismissals_are_pruned_on_next_message() {
    let h = harness(Arc::new(MemoryStore::new()), true);
    h.service.dismiss_email("old@b.com", Some(1)).await.unwrap();
    h.service.dismiss_email("new@b.com", Some(48)).await.unwrap();

    h.clock.advance(2 * MILLIS_PER_HOUR);
    let response = h
        .service
        .handle_message(&a3s_mailguard::InboundMessage::GetHistory.to_message())
        .await
        .unwrap();

    let dismissed = &response.to_value()["dismissed"];
    assert!(dismissed.get("old@b.com").is_none());
    assert_eq!(dismissed["new@b.com"], T0 + 48 * MILLIS_PER_HOUR);
}

#[tokio::test]
async fn test_history_client_over_local_relay() {
    let h = harness(Arc::new(MemoryStore::new()), true);
    let client = HistoryClient::new(Arc::new(LocalRelay::new(h.service.clone())));

    h.fetch
        .fetch(URL.into(), Some(FetchInit::post_json(r#"{"q":"a@b.com"}"#)))
        .await
        .unwrap();
    client.dismiss_email_for("a@b.com", Some(2)).await.unwrap();

    let history = client.get_history().await.unwrap();
    let latest = history.latest_issue().unwrap();
    let status = history.dismissal_status(&latest.emails[0].email, T0);
    assert!(status.dismissed);
    assert_eq!(status.until, T0 + 2 * MILLIS_PER_HOUR);

    client.clear_history().await.unwrap();
    let history = client.get_history().await.unwrap();
    assert!(history.issues.is_empty());
    assert_eq!(history.dismissed.len(), 1);
}

// ─── Persistence ─────────────────────────────────────────────────

#[tokio::test]
async fn test_append_is_idempotent_per_issue_id() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    let request = ScanRequest {
        id: "req-1".to_string(),
        url: URL.to_string(),
        method: "POST".to_string(),
        body_text: "x@y.com".to_string(),
    };

    let outcome = h.service.scan(&request).await.unwrap();
    let issue = outcome.issue.unwrap();
    assert!(!h.service.repository().append_issue(&issue).await.unwrap());
    assert_eq!(h.service.history().await.unwrap().issues.len(), 1);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailguard.json");

    {
        let h = harness(Arc::new(FileStore::new(&path)), true);
        h.fetch
            .fetch(URL.into(), Some(FetchInit::post_json(r#"{"q":"x@y.com"}"#)))
            .await
            .unwrap();
        h.service.dismiss_email("x@y.com", None).await.unwrap();
    }

    let h = harness(Arc::new(FileStore::new(&path)), false);
    let history = h.service.history().await.unwrap();
    assert_eq!(history.issues.len(), 1);
    assert_eq!(history.dismissed["x@y.com"], T0 + 24 * MILLIS_PER_HOUR);

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["pm_issues"]["version"], 1);
    assert_eq!(raw["pm_dismissed"]["version"], 1);
}

struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, key: &str) -> a3s_mailguard::Result<Option<Value>> {
        Err(GuardError::Store {
            key: key.to_string(),
            reason: "storage unavailable".to_string(),
        })
    }

    async fn set(&self, key: &str, _value: Value) -> a3s_mailguard::Result<()> {
        Err(GuardError::Store {
            key: key.to_string(),
            reason: "storage unavailable".to_string(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_store_outage_sends_original_body() {
    let config = GuardConfig {
        retry: RetryConfig::disabled(),
        ..GuardConfig::default()
    };
    let (sink, _alerts) = ChannelAlertSink::new();
    let service = Arc::new(
        BackgroundService::with_clock(
            Arc::new(FailingStore),
            Arc::new(sink),
            Arc::new(ManualClock::new(T0)),
            &config,
        )
        .unwrap(),
    );

    let bus = WindowBus::default();
    let relay = Arc::new(ContentRelay::new(Arc::new(LocalRelay::new(service))));
    let relay_task = relay.spawn(bus.clone());
    let (fetch, listener) = SanitizingFetch::attach(RecordingFetch::default(), &bus, &config).unwrap();

    let body = r#"{"q":"x@y.com"}"#;
    fetch.fetch(URL.into(), Some(FetchInit::post_json(body))).await.unwrap();
    assert_eq!(fetch.inner().sent_body(0), text(body));

    relay_task.abort();
    listener.abort();
}
