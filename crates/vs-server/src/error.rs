//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`vs_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on engine calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use vs_core::Error;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

fn code(err: &Error) -> &'static str {
    match err {
        Error::NotFound { .. } => "not_found",
        Error::Validation(_) => "validation_error",
        Error::Conflict(_) => "conflict",
        Error::Database { .. } => "database_error",
        Error::Io { .. } => "io_error",
        Error::Tool { .. } => "tool_error",
        Error::UnsupportedContainer(_) => "unsupported_container",
        Error::CorruptHeader(_) => "corrupt_header",
        Error::NoDecodableStreams(_) => "no_decodable_streams",
        Error::IncompatibleFormat(_) => "incompatible_format",
        Error::Stage { .. } => "stage_failure",
        Error::WorkerLost(_) => "worker_lost",
        Error::Timeout(_) => "timeout",
        Error::Cancelled => "cancelled",
        Error::Internal(_) => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "Server error in API handler");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": code(&self.inner),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let response = AppError::new(Error::not_found("job", "abc")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_produces_400() {
        let response = AppError::new(Error::Validation("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn engine_errors_have_codes() {
        assert_eq!(code(&Error::IncompatibleFormat("x".into())), "incompatible_format");
        assert_eq!(code(&Error::stage("mux", "disk full")), "stage_failure");
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(Error::Internal("oops".into())).with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }
}
