//! HTTP request handlers and shared application state.

use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::*;
use crate::cluster::{ClusterView, NodeId, NodeInfo};
use crate::coordinator::{BulkOutcome, Coordinator, NodeStats, NodeStatus};
use crate::error::CoordinatorError;
use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use lodestone_core::{config, Document, SearchRequest};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub prometheus_handle: PrometheusHandle,
    pub start_time: Instant,
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {e}")))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let node = state.coordinator.get_node();
    let status = match (node.state, node.leader) {
        ("shutdown", _) => "stopped",
        (_, None) => "no_leader",
        _ => "ok",
    };
    let code = if status == "stopped" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            node_id: node.id,
            state: node.state,
            leader: node.leader,
            documents: state.coordinator.engine().document_count(),
        }),
    )
}

/// `GET /metrics`
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    metrics::update_node_metrics(&state.coordinator);
    state.prometheus_handle.render()
}

// --- Cluster ---

/// `GET /node`
pub async fn get_node(State(state): State<AppState>) -> Json<NodeStatus> {
    Json(state.coordinator.get_node())
}

/// `GET /cluster`
pub async fn get_cluster(State(state): State<AppState>) -> Json<ClusterView> {
    Json(state.coordinator.get_cluster().await)
}

/// `POST /cluster/nodes`
pub async fn join_node(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Json<ClusterView>, ApiError> {
    let node: NodeInfo = parse_json(&body)?;
    state
        .coordinator
        .join(node)
        .await
        .map_err(|e| ApiError::for_write(e, &uri))?;
    Ok(Json(state.coordinator.get_cluster().await))
}

/// `DELETE /cluster/nodes/:id`
pub async fn leave_node(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<NodeId>,
) -> Result<Json<ClusterView>, ApiError> {
    state
        .coordinator
        .leave(id)
        .await
        .map_err(|e| ApiError::for_write(e, &uri))?;
    Ok(Json(state.coordinator.get_cluster().await))
}

/// `POST /snapshot`
pub async fn snapshot(State(state): State<AppState>) -> Result<Json<SnapshotResponse>, ApiError> {
    let snapshot = state.coordinator.snapshot().await?;
    Ok(Json(SnapshotResponse { snapshot }))
}

// --- Documents ---

/// `GET /documents/:id`
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state.coordinator.get(&id)?;
    Ok(Json(DocumentResponse::from(document.as_ref())))
}

/// `PUT /documents`
pub async fn index_document(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Json<WriteResponse>, ApiError> {
    let document = parse_json::<DocumentRequest>(&body)?.into_document()?;
    let id = document.id.clone();
    let result = state.coordinator.index(document).await;
    metrics::record_write_operation("index", if result.is_ok() { "ok" } else { "error" });
    result.map_err(|e| ApiError::for_write(e, &uri))?;
    Ok(Json(WriteResponse {
        id,
        result: "indexed",
    }))
}

/// `DELETE /documents/:id`
pub async fn delete_document(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Result<Json<WriteResponse>, ApiError> {
    let result = state.coordinator.delete(&id).await;
    metrics::record_write_operation("delete", if result.is_ok() { "ok" } else { "error" });
    result.map_err(|e| ApiError::for_write(e, &uri))?;
    Ok(Json(WriteResponse {
        id,
        result: "deleted",
    }))
}

// --- Bulk ---

type LineStream = Pin<Box<dyn Stream<Item = Result<String, CoordinatorError>> + Send>>;

struct LineReader {
    body: axum::body::BodyDataStream,
    buf: Vec<u8>,
    done: bool,
}

fn line_from(raw: Vec<u8>) -> Option<Result<String, CoordinatorError>> {
    match String::from_utf8(raw) {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(Ok(line)),
        Err(_) => Some(Err(CoordinatorError::InvalidArgument(
            "bulk line is not valid UTF-8".into(),
        ))),
    }
}

/// Splits a request body into non-empty lines as it arrives, without
/// buffering the whole body.
fn ndjson_lines(body: Body) -> LineStream {
    let reader = LineReader {
        body: body.into_data_stream(),
        buf: Vec::new(),
        done: false,
    };
    Box::pin(futures::stream::unfold(reader, |mut r| async move {
        loop {
            if let Some(pos) = r.buf.iter().position(|b| *b == b'\n') {
                let mut raw: Vec<u8> = r.buf.drain(..=pos).collect();
                raw.pop();
                match line_from(raw) {
                    Some(item) => return Some((item, r)),
                    None => continue,
                }
            }
            if r.done {
                if r.buf.is_empty() {
                    return None;
                }
                let raw = std::mem::take(&mut r.buf);
                match line_from(raw) {
                    Some(item) => return Some((item, r)),
                    None => return None,
                }
            }
            if r.buf.len() > config::MAX_REQUEST_BODY_BYTES {
                r.done = true;
                r.buf.clear();
                return Some((
                    Err(CoordinatorError::InvalidArgument(format!(
                        "bulk line exceeds {} bytes",
                        config::MAX_REQUEST_BODY_BYTES
                    ))),
                    r,
                ));
            }
            match r.body.next().await {
                Some(Ok(chunk)) => r.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    r.done = true;
                    r.buf.clear();
                    return Some((
                        Err(CoordinatorError::InvalidArgument(format!(
                            "failed to read request body: {e}"
                        ))),
                        r,
                    ));
                }
                None => r.done = true,
            }
        }
    }))
}

fn parse_line<T: DeserializeOwned>(line: &str) -> Result<T, CoordinatorError> {
    serde_json::from_str(line)
        .map_err(|e| CoordinatorError::InvalidArgument(format!("invalid bulk line: {e}")))
}

fn parse_bulk_document(line: &str) -> Result<Document, CoordinatorError> {
    parse_line::<DocumentRequest>(line)?
        .into_document()
        .map_err(|e| match e {
            ApiError::BadRequest(msg) => CoordinatorError::InvalidArgument(msg),
            other => CoordinatorError::Internal(format!("{other:?}")),
        })
}

fn bulk_response(operation: &str, outcome: BulkOutcome) -> Response {
    metrics::record_bulk_operation(operation, outcome.count);
    match outcome.error {
        None => Json(BulkResponse {
            count: outcome.count,
            error: None,
        })
        .into_response(),
        Some(error) => {
            // The body is consumed, so a redirect cannot be replayed here.
            let status = ApiError::from(error.clone()).status();
            (
                status,
                Json(BulkResponse {
                    count: outcome.count,
                    error: Some(error.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /bulk/index` (newline-delimited JSON documents)
pub async fn bulk_index(State(state): State<AppState>, body: Body) -> Response {
    let documents = ndjson_lines(body).map(|line| line.and_then(|l| parse_bulk_document(&l)));
    let outcome = state.coordinator.bulk_index(documents).await;
    bulk_response("index", outcome)
}

/// `POST /bulk/delete` (newline-delimited `{"id": ...}` objects)
pub async fn bulk_delete(State(state): State<AppState>, body: Body) -> Response {
    let ids = ndjson_lines(body)
        .map(|line| line.and_then(|l| parse_line::<DocumentRef>(&l).map(|r| r.id)));
    let outcome = state.coordinator.bulk_delete(ids).await;
    bulk_response("delete", outcome)
}

// --- Search ---

/// `POST /search`
pub async fn search(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SearchResponse>, ApiError> {
    let request: SearchRequest = parse_json(&body)?;
    let start = Instant::now();
    let result = state.coordinator.search(&request)?;
    let elapsed = start.elapsed();
    let search_type = if request.query.trim().is_empty() {
        "filter"
    } else {
        "bm25"
    };
    metrics::record_search_operation(search_type, elapsed);

    let only = request.fields.as_deref();
    Ok(Json(SearchResponse {
        total: result.total,
        hits: result
            .hits
            .iter()
            .map(|hit| SearchHit::from_scored(hit, only))
            .collect(),
        took_ms: elapsed.as_millis() as u64,
    }))
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<NodeStats> {
    Json(state.coordinator.stats())
}
