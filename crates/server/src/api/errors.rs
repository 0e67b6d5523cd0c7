//! API error types mapped to HTTP status codes.
//!
//! Each [`ApiError`] variant maps to a specific HTTP status code and produces
//! a JSON response body `{"error": "message"}`.

use crate::error::{CoordinatorError, LeaderHint};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type that implements `IntoResponse`.
///
/// Each variant maps to an HTTP status code:
/// - `NotFound` → 404
/// - `BadRequest` → 400
/// - `ServiceUnavailable` → 503 (with the leader, if known, in the body)
/// - `Redirect` → 307 (with `Location` header)
/// - `Internal` → 500
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    ServiceUnavailable {
        message: String,
        leader: Option<LeaderHint>,
    },
    /// Redirect to the leader (307 keeps method and body).
    Redirect(String),
    Internal(String),
}

impl ApiError {
    /// Maps a coordinator error from a write. When the leader's address is
    /// known the client is redirected to the same path on the leader.
    pub fn for_write(err: CoordinatorError, uri: &Uri) -> Self {
        if let Some(LeaderHint {
            addr: Some(addr), ..
        }) = err.leader_hint()
        {
            let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
            return ApiError::Redirect(format!("http://{addr}{path}"));
        }
        err.into()
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Redirect(_) => StatusCode::TEMPORARY_REDIRECT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotFound(msg) => ApiError::NotFound(msg),
            CoordinatorError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            CoordinatorError::Unavailable { message, leader } => {
                ApiError::ServiceUnavailable { message, leader }
            }
            CoordinatorError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ApiError::Internal(msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Redirect(location) => match axum::http::HeaderValue::from_str(&location) {
                Ok(val) => {
                    let mut resp =
                        (status, axum::Json(json!({ "redirect": location }))).into_response();
                    resp.headers_mut().insert(axum::http::header::LOCATION, val);
                    resp
                }
                Err(_) => {
                    let body = axum::Json(json!({ "error": "Invalid redirect location" }));
                    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
                }
            },
            ApiError::ServiceUnavailable { message, leader } => {
                let body = match leader {
                    Some(leader) => json!({ "error": message, "leader": leader }),
                    None => json!({ "error": message }),
                };
                (status, axum::Json(body)).into_response()
            }
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Internal(msg) => {
                (status, axum::Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}
