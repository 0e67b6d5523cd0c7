//! REST API layer built on Axum.
//!
//! Exposes the coordinator's operations as HTTP/JSON routes, plus health and
//! Prometheus metrics. Includes middleware for request timeouts, body size
//! limits, metrics collection, and request ID tracing.

/// API error types mapped to HTTP status codes.
pub mod errors;
/// HTTP request handlers and application state.
pub mod handlers;
/// Prometheus metrics recording and background collection.
pub mod metrics;
/// Request and response data transfer objects.
pub mod models;

use crate::cluster::api::{raft_router, RaftState};
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use handlers::AppState;
use lodestone_core::config;
use std::time::{Duration, Instant};
use tower::buffer::BufferLayer;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(axum::http::HeaderName::from_static("x-request-id"), value);
        }
        response
    }
    .instrument(span)
    .await
}

async fn security_headers_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::HeaderName::from_static("x-content-type-options"),
        axum::http::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        axum::http::HeaderName::from_static("x-frame-options"),
        axum::http::HeaderValue::from_static("DENY"),
    );
    response
}

async fn metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = matched_path(&req);
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Route template (`/documents/:id`) rather than the raw path, so label
/// cardinality stays bounded.
fn matched_path(req: &axum::http::Request<axum::body::Body>) -> String {
    req.extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Builds the client-facing router with all routes and middleware layers.
///
/// Bulk routes stream their bodies and are kept out of the request timeout
/// and the regular body limit. Membership routes skip the request timeout
/// only; each of their Raft steps is bounded by the write timeout.
///
/// The middleware stack (outermost to innermost): Concurrency limit →
/// Timeout → Body limit → CORS → Trace → Security headers → Request ID →
/// Metrics.
pub fn create_router(state: AppState) -> Router {
    let bounded = Router::new()
        .route("/node", get(handlers::get_node))
        .route("/cluster", get(handlers::get_cluster))
        .route("/snapshot", post(handlers::snapshot))
        .route("/documents", put(handlers::index_document))
        .route(
            "/documents/:id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        .route("/search", post(handlers::search))
        .route("/stats", get(handlers::stats))
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    if err.is::<tower::timeout::error::Elapsed>() {
                        StatusCode::REQUEST_TIMEOUT
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }))
                .layer(BufferLayer::new(1024))
                .layer(ConcurrencyLimitLayer::new(config::MAX_CONCURRENT_REQUESTS))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config::REQUEST_TIMEOUT_SECS,
                ))),
        );

    // A join runs up to two bounded Raft steps, so it can outlast the request
    // timeout while still ending in its own error.
    let membership = Router::new()
        .route("/cluster/nodes", post(handlers::join_node))
        .route("/cluster/nodes/:id", delete(handlers::leave_node))
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES));

    let bulk = Router::new()
        .route("/bulk/index", post(handlers::bulk_index))
        .route("/bulk/delete", post(handlers::bulk_delete))
        .layer(DefaultBodyLimit::max(config::MAX_BULK_BODY_BYTES));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(bounded)
        .merge(membership)
        .merge(bulk)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The full node application: client routes plus the Raft peer routes.
pub fn create_app(state: AppState) -> Router {
    let raft_state = RaftState {
        raft: state.coordinator.raft(),
    };
    create_router(state).merge(raft_router(raft_state).layer(DefaultBodyLimit::max(
        config::MAX_BULK_BODY_BYTES,
    )))
}
