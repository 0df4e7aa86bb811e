//! Server regression tests.
//!
//! Drives the assembled router in-process with `oneshot`, and runs the
//! agent's sender against a real listener for the envelope round trip.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tokio::sync::watch;
use tower::ServiceExt;

use pulse_agent::{SendError, Sender};
use pulse_api::{build_router, ApiState};
use pulse_core::{MetricKind, MetricUpdate, MetricValue};
use pulse_envelope::{Decryptor, Encryptor, Opener, Sealer, Signer};
use pulse_state::{snapshot, MemoryStore, MetricStore, SnapshotPersister, SqlStore};

const KEY: &str = "regression-key";

fn memory_router() -> (Router, MemoryStore) {
    let store = MemoryStore::new();
    let router = build_router(ApiState::new(Arc::new(store.clone())));
    (router, store)
}

fn rsa_pair() -> (Encryptor, Decryptor) {
    let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let decryptor = Decryptor::new(key).unwrap();
    let encryptor = Encryptor::new(decryptor.public_key()).unwrap();
    (encryptor, decryptor)
}

async fn spawn_server(state: ApiState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

const REPORT: &str = r#"[{"id":"HeapAlloc","type":"gauge","value":123456},{"id":"PollCount","type":"counter","delta":1}]"#;

async fn report_then_read(router: &Router) {
    let (status, body) = send(router, post("/updates/", REPORT)).await;
    assert_eq!(status, StatusCode::OK);
    let reply: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["updated"], 2);

    assert_eq!(
        send(router, get("/value/gauge/HeapAlloc")).await,
        (StatusCode::OK, "123456".to_string())
    );
    assert_eq!(
        send(router, get("/value/counter/PollCount")).await,
        (StatusCode::OK, "1".to_string())
    );

    let (status, _) = send(router, post("/updates/", REPORT)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        send(router, get("/value/counter/PollCount")).await,
        (StatusCode::OK, "2".to_string())
    );
}

// ── Scenario ───────────────────────────────────────────────────

#[tokio::test]
async fn report_then_read_memory_backend() {
    let (router, _) = memory_router();
    report_then_read(&router).await;
}

#[tokio::test]
async fn report_then_read_sql_backend() {
    let store = SqlStore::open_in_memory().await.unwrap();
    let router = build_router(ApiState::new(Arc::new(store)));
    report_then_read(&router).await;
}

#[tokio::test]
async fn path_and_read_errors() {
    let (router, store) = memory_router();

    let (status, _) = send(&router, post("/update/histogram/x/1", Body::empty())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&router, post("/update/counter/x/abc", Body::empty())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&router, post("/update/gauge/", Body::empty())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, get("/value/gauge/never-written")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(store.snapshot().await.is_empty());
}

#[tokio::test]
async fn json_record_endpoints() {
    let (router, _) = memory_router();

    let record = r#"{"id":"Requests","type":"counter","delta":4}"#;
    send(&router, post("/update/", record)).await;
    let (status, body) = send(&router, post("/update/", record)).await;
    assert_eq!(status, StatusCode::OK);
    let stored: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stored["delta"], 8);

    let lookup = post("/value/", r#"{"id":"Requests","type":"counter"}"#);
    let (status, body) = send(&router, lookup).await;
    assert_eq!(status, StatusCode::OK);
    let read: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(read, serde_json::json!({"id": "Requests", "type": "counter", "delta": 8}));
}

#[tokio::test]
async fn index_page_lists_metrics_and_compresses() {
    let (router, _) = memory_router();
    send(&router, post("/updates/", REPORT)).await;

    let req = Request::builder()
        .uri("/")
        .header("accept-encoding", "gzip")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-encoding"], "gzip");

    let (_, page) = send(&router, get("/")).await;
    assert!(page.contains("HeapAlloc"));
    assert!(page.contains("PollCount"));
}

// ── Envelope end to end ────────────────────────────────────────

#[tokio::test]
async fn agent_with_every_layer_is_applied() {
    let (encryptor, decryptor) = rsa_pair();
    let store = MemoryStore::new();
    let opener = Opener::new()
        .with_signer(Some(Signer::new(KEY)))
        .with_decryptor(Some(decryptor));
    let addr = spawn_server(ApiState::new(Arc::new(store.clone())).with_opener(opener)).await;

    let sealer = Sealer::new()
        .with_compression(true)
        .with_signer(Some(Signer::new(KEY)))
        .with_encryptor(Some(encryptor));
    let sender = Sender::new(addr, sealer);
    let (_tx, rx) = watch::channel(false);

    let batch = vec![
        MetricUpdate::gauge("HeapAlloc", 123456.0),
        MetricUpdate::counter("PollCount", 1),
    ];
    sender.send(&batch, &rx).await.unwrap();

    assert_eq!(
        store.get_value(MetricKind::Gauge, "HeapAlloc").await.unwrap(),
        Some(MetricValue::Gauge(123456.0))
    );
    assert_eq!(
        store.get_value(MetricKind::Counter, "PollCount").await.unwrap(),
        Some(MetricValue::Counter(1))
    );
}

#[tokio::test]
async fn wrong_signature_is_rejected_and_not_retried() {
    let store = MemoryStore::new();
    let opener = Opener::new().with_signer(Some(Signer::new(KEY)));
    let addr = spawn_server(ApiState::new(Arc::new(store.clone())).with_opener(opener)).await;

    let sealer = Sealer::new()
        .with_compression(true)
        .with_signer(Some(Signer::new("not-the-key")));
    let sender = Sender::new(addr, sealer);
    let (_tx, rx) = watch::channel(false);

    let started = Instant::now();
    let err = sender
        .send(&[MetricUpdate::counter("PollCount", 1)], &rx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Rejected { status, .. } if status == StatusCode::BAD_REQUEST
    ));
    // The first retry would only fire after a full second.
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(store.snapshot().await.is_empty());
}

#[tokio::test]
async fn body_for_another_key_pair_is_rejected() {
    let (foreign_encryptor, _) = rsa_pair();
    let (_, decryptor) = rsa_pair();
    let store = MemoryStore::new();
    let opener = Opener::new().with_decryptor(Some(decryptor));
    let addr = spawn_server(ApiState::new(Arc::new(store.clone())).with_opener(opener)).await;

    let sender = Sender::new(addr, Sealer::new().with_encryptor(Some(foreign_encryptor)));
    let (_tx, rx) = watch::channel(false);
    let err = sender
        .send(&[MetricUpdate::gauge("g", 1.0)], &rx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Rejected { status, .. } if status == StatusCode::BAD_REQUEST
    ));
    assert!(store.snapshot().await.is_empty());
}

#[tokio::test]
async fn untrusted_agent_is_forbidden() {
    let store = MemoryStore::new();
    let state = ApiState::new(Arc::new(store.clone()))
        .with_trusted_subnet(Some("10.0.0.0/8".parse().unwrap()));
    let addr = spawn_server(state).await;

    // The agent reports its loopback address.
    let sender = Sender::new(addr, Sealer::new());
    let (_tx, rx) = watch::channel(false);
    let err = sender
        .send(&[MetricUpdate::gauge("g", 1.0)], &rx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Rejected { status, .. } if status == StatusCode::FORBIDDEN
    ));
    assert!(store.snapshot().await.is_empty());
}

// ── Persistence ────────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart_via_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    {
        let store = MemoryStore::new();
        let persister = Arc::new(SnapshotPersister::new(store.clone(), &path, Duration::ZERO));
        let router = build_router(ApiState::new(Arc::new(store)).with_persister(Some(persister)));
        report_then_read(&router).await;
    }

    let restarted = MemoryStore::new();
    assert_eq!(snapshot::restore(&restarted, &path).await, 2);
    let router = build_router(ApiState::new(Arc::new(restarted)));
    assert_eq!(
        send(&router, get("/value/counter/PollCount")).await,
        (StatusCode::OK, "2".to_string())
    );
    assert_eq!(
        send(&router, get("/value/gauge/HeapAlloc")).await,
        (StatusCode::OK, "123456".to_string())
    );
}
