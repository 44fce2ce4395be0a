//! Axum router construction.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        // Jobs
        .route("/jobs", get(routes::jobs::list_jobs).post(routes::jobs::submit_job))
        .route("/jobs/{id}", get(routes::jobs::get_job))
        .route("/jobs/{id}/cancel", post(routes::jobs::cancel_job))
        // SSE Events
        .route("/events", get(routes::events::events_handler))
        // System
        .route("/health", get(routes::system::health))
        .route("/formats", get(routes::system::formats))
        .route("/tools", get(routes::system::tools));

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use vs_core::config::{BackendKind, Config};

    fn ctx(dir: &std::path::Path) -> AppContext {
        let mut config = Config::default();
        config.engine.backend = BackendKind::Passthrough;
        config.engine.output_dir = dir.join("out");
        AppContext::build(config).unwrap()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let cap = ctx.scheduler.capacity();
        let (status, body) = get(build_router(ctx), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["capacity"], cap);
        assert_eq!(body["queued"], 0);
    }

    #[tokio::test]
    async fn formats_lists_every_target() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(build_router(ctx(dir.path())), "/api/formats").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["mp4", "avi", "mov", "webm", "mkv"]);
    }

    #[tokio::test]
    async fn unknown_job_is_404_and_bad_id_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(ctx(dir.path()));

        let uri = format!("/api/jobs/{}", vs_core::JobId::new());
        let (status, body) = get(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = get(app, "/api/jobs/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn submit_rejects_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.mkv");
        std::fs::write(&src, b"x").unwrap();
        let app = build_router(ctx(dir.path()));

        let body = serde_json::json!({ "source": src, "target": "flv" }).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
