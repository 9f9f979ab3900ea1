use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use self::rest::router as rest_router;

pub mod rest;

use crate::infrastructure::config::Config;

pub fn build_router(config: Arc<Config>) -> Router {
    // Multipart framing overhead on top of the per-file upload cap.
    let body_limit = config.uploads.max_bytes as usize + 64 * 1024;

    Router::new()
        .nest("/api", rest_router())
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(config.as_ref()))
        .layer(TraceLayer::new_for_http())
}

pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not_found"})),
    )
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.app.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .app
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
