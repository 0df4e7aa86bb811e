//! Route handlers.
//!
//! Ingest handlers receive bodies already unwrapped by
//! [`open_envelope`](crate::ingest::open_envelope).

use askama::Template;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Html;
use axum::Json;
use tracing::debug;

use pulse_core::{
    decode_batch, Metric, MetricChange, MetricKind, MetricUpdate, MetricValue, Snapshot,
};
use pulse_state::apply_update;

use crate::error::ApiError;
use crate::ApiState;

// ── Ingest ─────────────────────────────────────────────────────

/// POST /update/{kind}/{id}/{value}
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let update = MetricUpdate::new(id, MetricChange::parse(kind, &value)?)?;
    let stored = apply_update(state.store.as_ref(), &update).await?;
    state.after_write().await;
    debug!(id = %update.id, kind = %kind, value = %stored, "metric updated");
    Ok(stored.to_string())
}

/// POST /update/
pub async fn update_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let record: Metric = serde_json::from_slice(&body)?;
    let update = MetricUpdate::try_from(record)?;
    let stored = apply_update(state.store.as_ref(), &update).await?;
    state.after_write().await;
    Ok(Json(Metric::with_value(update.id, stored)))
}

/// POST /updates/
pub async fn update_batch(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch = decode_batch(&body)?;
    state.store.update_batch(&batch).await?;
    state.after_write().await;
    debug!(updates = batch.len(), backend = state.store.backend(), "batch applied");
    Ok(Json(serde_json::json!({ "updated": batch.len() })))
}

// ── Reads ──────────────────────────────────────────────────────

/// GET /value/{kind}/{id}
pub async fn get_value(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse()?;
    match state.store.get_value(kind, &id).await? {
        Some(value) => Ok(value.to_string()),
        None => Err(ApiError::NotFound),
    }
}

/// POST /value/ with `{"id", "type"}`.
pub async fn get_value_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let request: Metric = serde_json::from_slice(&body)?;
    match state.store.get_value(request.kind, &request.id).await? {
        Some(value) => Ok(Json(Metric::with_value(request.id, value))),
        None => Err(ApiError::NotFound),
    }
}

/// GET /
pub async fn list_metrics(State(state): State<ApiState>) -> Result<Html<String>, ApiError> {
    let snapshot = state.store.get_all().await?;
    Ok(render_index(&snapshot))
}

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> Result<&'static str, ApiError> {
    state.store.ping().await?;
    Ok("OK")
}

// ── Index page ─────────────────────────────────────────────────

struct MetricRow {
    id: String,
    kind: MetricKind,
    value: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    rows: Vec<MetricRow>,
}

fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(tmpl.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}

fn render_index(snapshot: &Snapshot) -> Html<String> {
    let rows = snapshot
        .to_metrics()
        .into_iter()
        .map(|metric| MetricRow {
            value: match (metric.value, metric.delta) {
                (Some(v), _) => MetricValue::Gauge(v).to_string(),
                (None, Some(d)) => d.to_string(),
                (None, None) => String::new(),
            },
            id: metric.id,
            kind: metric.kind,
        })
        .collect();
    render(IndexPage { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use pulse_state::{MemoryStore, MetricStore, SnapshotPersister, SqlStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state() -> (ApiState, MemoryStore) {
        let store = MemoryStore::new();
        (ApiState::new(Arc::new(store.clone())), store)
    }

    fn path3(kind: &str, id: &str, value: &str) -> Path<(String, String, String)> {
        Path((kind.to_string(), id.to_string(), value.to_string()))
    }

    fn path2(kind: &str, id: &str) -> Path<(String, String)> {
        Path((kind.to_string(), id.to_string()))
    }

    #[tokio::test]
    async fn path_update_then_read() {
        let (state, _) = test_state();

        let body = update_from_path(State(state.clone()), path3("gauge", "HeapAlloc", "123456"))
            .await
            .unwrap();
        assert_eq!(body, "123456");

        let value = get_value(State(state), path2("gauge", "HeapAlloc"))
            .await
            .unwrap();
        assert_eq!(value, "123456");
    }

    #[tokio::test]
    async fn path_counter_accumulates() {
        let (state, _) = test_state();
        for _ in 0..2 {
            update_from_path(State(state.clone()), path3("counter", "PollCount", "1"))
                .await
                .unwrap();
        }
        let value = get_value(State(state), path2("counter", "PollCount"))
            .await
            .unwrap();
        assert_eq!(value, "2");
    }

    #[tokio::test]
    async fn path_validation_errors() {
        let (state, store) = test_state();

        let err = update_from_path(State(state.clone()), path3("histogram", "x", "1"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = update_from_path(State(state.clone()), path3("counter", "x", "1.5"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = update_from_path(State(state), path3("gauge", "x", "NaN"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_metric_is_not_found() {
        let (state, _) = test_state();
        let err = get_value(State(state), path2("gauge", "missing"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn json_update_returns_running_total() {
        let (state, _) = test_state();
        let body = Bytes::from_static(br#"{"id":"PollCount","type":"counter","delta":3}"#);

        update_json(State(state.clone()), body.clone()).await.unwrap();
        let Json(record) = update_json(State(state), body).await.unwrap();
        assert_eq!(record.delta, Some(6));
        assert_eq!(record.kind, MetricKind::Counter);
    }

    #[tokio::test]
    async fn json_update_missing_value_is_bad_request() {
        let (state, _) = test_state();
        let body = Bytes::from_static(br#"{"id":"HeapAlloc","type":"gauge"}"#);
        let err = update_json(State(state), body).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_reports_count() {
        let (state, store) = test_state();
        let body = Bytes::from_static(
            br#"[{"id":"g","type":"gauge","value":1.5},{"id":"c","type":"counter","delta":2},{"id":"c","type":"counter","delta":3}]"#,
        );
        let Json(reply) = update_batch(State(state), body).await.unwrap();
        assert_eq!(reply["updated"], 3);
        assert_eq!(store.snapshot().await.counters["c"], 5);
    }

    #[tokio::test]
    async fn invalid_record_rejects_whole_batch() {
        let (state, store) = test_state();
        let body = Bytes::from_static(
            br#"[{"id":"g","type":"gauge","value":1.5},{"id":"c","type":"counter"}]"#,
        );
        let err = update_batch(State(state), body).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn value_json_lookup() {
        let (state, store) = test_state();
        store.update_gauge("Sys", 42.25).await.unwrap();

        let body = Bytes::from_static(br#"{"id":"Sys","type":"gauge"}"#);
        let Json(record) = get_value_json(State(state.clone()), body).await.unwrap();
        assert_eq!(record.value, Some(42.25));

        let body = Bytes::from_static(br#"{"id":"Sys","type":"counter"}"#);
        let err = get_value_json(State(state), body).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn index_lists_all_metrics_escaped() {
        let (state, store) = test_state();
        store.update_gauge("<script>", 1.0).await.unwrap();
        store.update_counter("PollCount", 7).await.unwrap();

        let Html(page) = list_metrics(State(state)).await.unwrap();
        assert!(page.contains("<td>&lt;script&gt;</td><td>gauge</td><td>1</td>"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("<td>PollCount</td><td>counter</td><td>7</td>"));
    }

    #[tokio::test]
    async fn ping_reports_backend_health() {
        let (state, _) = test_state();
        assert_eq!(ping(State(state)).await.unwrap(), "OK");

        let sql = SqlStore::open_in_memory().await.unwrap();
        let state = ApiState::new(Arc::new(sql.clone()));
        assert!(ping(State(state.clone())).await.is_ok());

        sql.pool().close().await;
        let err = ping(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn sql_backend_serves_same_semantics() {
        let sql = SqlStore::open_in_memory().await.unwrap();
        let state = ApiState::new(Arc::new(sql));
        for _ in 0..2 {
            update_from_path(State(state.clone()), path3("counter", "PollCount", "1"))
                .await
                .unwrap();
        }
        assert_eq!(
            state.store.get_value(MetricKind::Counter, "PollCount").await.unwrap(),
            Some(MetricValue::Counter(2))
        );
    }

    #[tokio::test]
    async fn write_through_persists_after_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = MemoryStore::new();
        let persister = Arc::new(SnapshotPersister::new(store.clone(), &path, Duration::ZERO));
        let state = ApiState::new(Arc::new(store)).with_persister(Some(persister));

        update_from_path(State(state), path3("gauge", "g", "2.5"))
            .await
            .unwrap();

        let saved = pulse_state::snapshot::load(&path).await.unwrap();
        assert_eq!(saved.gauges["g"], 2.5);
    }
}
