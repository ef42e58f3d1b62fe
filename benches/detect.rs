//! Performance benchmarks for a3s-mailguard
//!
//! Run with: cargo bench

use a3s_mailguard::detect::{find_emails, is_final_request, redact};
use a3s_mailguard::{
    BackgroundService, GuardConfig, LogAlertSink, ManualClock, MemoryStore, ScanRequest,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn chat_body(messages: usize, with_email: bool) -> String {
    let parts: Vec<serde_json::Value> = (0..messages)
        .map(|i| {
            let text = if with_email && i % 4 == 0 {
                format!("message {} reach me at user{}@example.com tomorrow", i, i)
            } else {
                format!("message {} with no contact details at all", i)
            };
            serde_json::json!({"author": {"role": "user"}, "content": {"parts": [text]}})
        })
        .collect();
    serde_json::json!({"action": "next", "messages": parts}).to_string()
}

fn bench_detection(c: &mut Criterion) {
    let clean = chat_body(20, false);
    let dirty = chat_body(20, true);

    c.bench_function("find_emails (clean)", |b| b.iter(|| find_emails(&clean)));
    c.bench_function("find_emails (4 emails)", |b| b.iter(|| find_emails(&dirty)));
    c.bench_function("redact (4 emails)", |b| b.iter(|| redact(&dirty)));
    c.bench_function("is_final_request", |b| b.iter(|| is_final_request(&dirty)));
}

fn bench_body_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("redact_by_messages");
    for size in [1, 10, 100] {
        let body = chat_body(size, true);
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| redact(body));
        });
    }
    group.finish();
}

fn bench_service_scan(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = BackgroundService::with_clock(
        Arc::new(MemoryStore::new()),
        Arc::new(LogAlertSink),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        &GuardConfig::default(),
    )
    .unwrap();

    let partial = serde_json::json!({"partial_query": "x@y.com so far"}).to_string();
    let request = ScanRequest {
        id: "bench".to_string(),
        url: "https://chatgpt.com/backend-api/conversation".to_string(),
        method: "POST".to_string(),
        body_text: partial,
    };

    c.bench_function("scan (partial, no persistence)", |b| {
        b.to_async(&rt)
            .iter(|| async { service.scan(&request).await.unwrap() });
    });
}

criterion_group!(benches, bench_detection, bench_body_size, bench_service_scan);
criterion_main!(benches);
