//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/` and require an API key.
//! Middleware: tracing, plus CORS for explicitly allowed origins only.

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
///
/// Without `allowed_origins` no CORS headers are sent, so browsers only
/// reach the API from its own origin.
pub fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    let api_routes = Router::new()
        // Jobs
        .route(
            "/jobs",
            post(handlers::job::create_job).get(handlers::job::list_jobs),
        )
        .route(
            "/jobs/{id}",
            get(handlers::job::get_job)
                .put(handlers::job::update_job)
                .delete(handlers::job::delete_job),
        )
        .route("/jobs/{id}/trigger", post(handlers::job::trigger_job))
        .route("/jobs/{id}/cancel", post(handlers::job::cancel_job))
        // Executions
        .route("/executions", get(handlers::execution::list_executions))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        // Plans
        .route("/plans/batches", post(handlers::job::plan_batches));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check));
    let router = match cors_layer(allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// CORS for the given origins, or `None` when there are none.
pub fn cors_layer(allowed_origins: Vec<HeaderValue>) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed_origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                HeaderName::from_static("x-api-key"),
            ]),
    )
}

/// Parse `--cors-origin` values.
pub fn parse_origins(origins: &[String]) -> Result<Vec<HeaderValue>, String> {
    origins
        .iter()
        .map(|origin| {
            let trimmed = origin.trim().trim_end_matches('/');
            if trimmed == "*" || !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                return Err(format!("invalid CORS origin '{origin}': expected http(s)://host[:port]"));
            }
            HeaderValue::from_str(trimmed).map_err(|e| format!("invalid CORS origin '{origin}': {e}"))
        })
        .collect()
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_origins_means_no_cors() {
        assert!(cors_layer(Vec::new()).is_none());
        assert!(cors_layer(vec![HeaderValue::from_static("http://localhost:3000")]).is_some());
    }

    #[test]
    fn origins_must_be_explicit() {
        let parsed = parse_origins(&["http://localhost:3000/".to_string()]).unwrap();
        assert_eq!(parsed, vec![HeaderValue::from_static("http://localhost:3000")]);

        assert!(parse_origins(&["*".to_string()]).is_err());
        assert!(parse_origins(&["localhost:3000".to_string()]).is_err());
        assert!(parse_origins(&[]).unwrap().is_empty());
    }
}
