use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use dead_letter_memory::MemoryDeadLetterSink;
use relay_api::{Attributes, Event, ManualClock, RelayError, TargetClient, TargetRequest, TargetResponse};
use relay_engine::{Engine, EngineHandle, PipeComponents, RelayConfig};
use store_memory::MemoryTtlStore;

// ═══════════════════════════════════════════════════════════════
//  Test doubles
// ═══════════════════════════════════════════════════════════════

/// Records every call with its (virtual) time and answers with scripted
/// statuses, then 200.
#[derive(Default)]
struct RecordingTarget {
    statuses: Mutex<VecDeque<u16>>,
    calls: Mutex<Vec<(Instant, TargetRequest)>>,
}

impl RecordingTarget {
    fn scripted(statuses: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Instant, TargetRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TargetClient for RecordingTarget {
    fn send(
        &self,
        request: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TargetResponse, RelayError>> + Send + '_>> {
        self.calls.lock().unwrap().push((Instant::now(), request));
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
        Box::pin(async move {
            Ok(TargetResponse {
                status,
                body: String::new(),
            })
        })
    }
}

struct Harness {
    engine: Engine,
    handle: EngineHandle,
    target: Arc<RecordingTarget>,
    clock: Arc<ManualClock>,
}

fn config(workers: usize, rate: u32, absent_policy: &str) -> RelayConfig {
    RelayConfig::parse(&format!(
        r#"
[pipe]
workers = {workers}
max_retry_count = 1
source_batch_size = 1
source_maximum_batching_window_ms = 6000
visibility_timeout_ms = 30000
retry_period_ms = 300000
absent_policy = "{absent_policy}"

[enrichment]
record_ttl_secs = 120
fields = ["firstName", "lastName"]

[target]
endpoint_url = "https://target.test/prod/*"
rate_limit_per_second = {rate}
"#
    ))
    .unwrap()
}

async fn start(config: RelayConfig, target: Arc<RecordingTarget>) -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let engine = Engine::bootstrap(
        config,
        PipeComponents {
            store: Arc::new(MemoryTtlStore::new(clock.clone())),
            client: target.clone(),
            dead_letters: Arc::new(MemoryDeadLetterSink::new()),
            clock: clock.clone(),
        },
    )
    .await
    .unwrap();
    let handle = engine.handle();
    Harness {
        engine,
        handle,
        target,
        clock,
    }
}

fn person_event(id: &str, person: &str) -> Event {
    Event {
        id: id.into(),
        event_type: "PersonCreated".into(),
        source: "de.example.person".into(),
        ts_ms: 0,
        payload: json!({"id": person}),
    }
}

fn person(first: &str, last: &str) -> Attributes {
    let mut a = Attributes::new();
    a.insert("firstName".into(), json!(first));
    a.insert("lastName".into(), json!(last));
    a.insert("internal".into(), json!(true));
    a
}

/// Poll `cond` on virtual time until it holds.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3600);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scenarios
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn enriched_event_is_delivered_and_acknowledged() {
    let h = start(config(1, 5, "retry"), RecordingTarget::scripted(&[])).await;
    h.handle.put_record("p-1", person("John", "Doe")).await.unwrap();
    h.handle.accept(person_event("e-1", "p-1"));

    wait_for("acknowledgement", || h.handle.status().pipe.acknowledged == 1).await;

    let calls = h.target.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.path_param, "p-1");
    assert_eq!(calls[0].1.idempotency_key, "e-1");
    assert_eq!(calls[0].1.body, json!({"id": "p-1", "firstName": "John", "lastName": "Doe"}));
    assert!(h.handle.dead_letters().await.unwrap().is_empty());
    assert_eq!(h.handle.status().buffer.in_flight, 0);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn absent_record_is_retried_once_then_dead_lettered() {
    let h = start(config(1, 5, "retry"), RecordingTarget::scripted(&[])).await;
    h.handle.accept(person_event("e-1", "p-missing"));

    wait_for("dead-letter", || h.handle.status().pipe.dead_lettered == 1).await;

    let entries = h.handle.dead_letters().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event.id, "e-1");
    assert_eq!(entries[0].receive_count, 2);
    assert!(
        entries[0].reason.ends_with("enrichment record not found for 'p-missing'"),
        "{}",
        entries[0].reason
    );
    assert!(h.target.calls().is_empty());

    let status = h.handle.status();
    assert_eq!(status.pipe.retried, 1);
    assert_eq!(status.pipe.acknowledged, 0);
    assert_eq!(status.buffer.visible + status.buffer.in_flight + status.buffer.delayed, 0);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_then_success_acknowledges_on_second_attempt() {
    let h = start(config(1, 5, "retry"), RecordingTarget::scripted(&[503])).await;
    h.handle.put_record("p-1", person("John", "Doe")).await.unwrap();
    h.handle.accept(person_event("e-1", "p-1"));

    wait_for("acknowledgement", || h.handle.status().pipe.acknowledged == 1).await;

    let calls = h.target.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, r)| r.idempotency_key == "e-1"));
    // backoff of the first retry: 1s base
    assert!(calls[1].0 - calls[0].0 >= Duration::from_secs(1));
    assert!(calls[1].0 - calls[0].0 < Duration::from_secs(300));

    let status = h.handle.status();
    assert_eq!(status.pipe.retried, 1);
    assert_eq!(status.pipe.dead_lettered, 0);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn burst_never_exceeds_rate_limit() {
    let n = 5u32;
    let total = 3 * n as usize;
    let h = start(config(total, n, "retry"), RecordingTarget::scripted(&[])).await;
    for i in 0..total {
        h.handle.put_record(&format!("p-{i}"), person("John", "Doe")).await.unwrap();
    }
    let events = (0..total).map(|i| person_event(&format!("e-{i}"), &format!("p-{i}"))).collect();
    h.handle.accept_batch(events);

    wait_for("all acknowledgements", || h.handle.status().pipe.acknowledged == total as u64).await;

    let mut times: Vec<Instant> = h.target.calls().into_iter().map(|(t, _)| t).collect();
    assert_eq!(times.len(), total);
    times.sort();
    for (i, t) in times.iter().enumerate() {
        let in_window = times[i..].iter().filter(|u| **u < *t + Duration::from_secs(1)).count();
        assert!(in_window <= n as usize, "{in_window} calls within one second");
    }
    assert!(times[total - 1] - times[0] >= Duration::from_secs(2));
    assert!(h.handle.dead_letters().await.unwrap().is_empty());
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn batch_larger_than_rate_is_delivered_within_one_lease() {
    let config = RelayConfig::parse(
        r#"
[pipe]
max_retry_count = 1
source_batch_size = 10
source_maximum_batching_window_ms = 6000
visibility_timeout_ms = 7000
retry_period_ms = 300000
absent_policy = "retry"

[enrichment]
record_ttl_secs = 120

[target]
endpoint_url = "https://target.test/prod/*"
rate_limit_per_second = 2
timeout_ms = 1000
"#,
    )
    .unwrap();
    let h = start(config, RecordingTarget::scripted(&[])).await;
    let total = 10;
    for i in 0..total {
        h.handle.put_record(&format!("p-{i}"), person("John", "Doe")).await.unwrap();
    }
    let events = (0..total).map(|i| person_event(&format!("e-{i}"), &format!("p-{i}"))).collect();
    h.handle.accept_batch(events);

    wait_for("all acknowledgements", || h.handle.status().pipe.acknowledged == total as u64).await;

    let mut times: Vec<Instant> = h.target.calls().into_iter().map(|(t, _)| t).collect();
    assert_eq!(times.len(), total);
    times.sort();
    for (i, t) in times.iter().enumerate() {
        let in_window = times[i..].iter().filter(|u| **u < *t + Duration::from_secs(1)).count();
        assert!(in_window <= 2, "{in_window} calls within one second");
    }
    // every call fits inside the first lease
    assert!(times[total - 1] - times[0] < Duration::from_secs(7));

    let status = h.handle.status();
    assert_eq!(status.pipe.retried, 0);
    assert_eq!(status.pipe.abandoned, 0);
    assert_eq!(status.pipe.dead_lettered, 0);
    assert!(h.handle.dead_letters().await.unwrap().is_empty());
    h.engine.shutdown().await;
}

// ═══════════════════════════════════════════════════════════════
//  TTL and ingress
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn expired_record_is_absent() {
    let h = start(config(1, 5, "dead_letter"), RecordingTarget::scripted(&[])).await;
    h.handle.put_record("p-1", person("John", "Doe")).await.unwrap();
    h.clock.advance(Duration::from_secs(120));
    h.handle.accept(person_event("e-1", "p-1"));

    wait_for("dead-letter", || h.handle.status().pipe.dead_lettered == 1).await;
    let entries = h.handle.dead_letters().await.unwrap();
    assert_eq!(entries[0].receive_count, 1);
    assert_eq!(entries[0].dead_lettered_at_ms, 1_700_000_120_000);
    assert!(h.target.calls().is_empty());
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn record_just_before_expiry_is_used() {
    let h = start(config(1, 5, "dead_letter"), RecordingTarget::scripted(&[])).await;
    h.handle.put_record("p-1", person("Jane", "Roe")).await.unwrap();
    h.clock.advance(Duration::from_millis(119_999));
    h.handle.accept(person_event("e-1", "p-1"));

    wait_for("acknowledgement", || h.handle.status().pipe.acknowledged == 1).await;
    assert_eq!(h.target.calls()[0].1.body["firstName"], json!("Jane"));
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_workers() {
    let h = start(config(2, 5, "retry"), RecordingTarget::scripted(&[])).await;
    h.engine.shutdown().await;

    h.handle.put_record("p-1", person("John", "Doe")).await.unwrap();
    h.handle.accept(person_event("e-1", "p-1"));
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(h.target.calls().is_empty());
    assert_eq!(h.handle.status().buffer.visible, 1);
}
