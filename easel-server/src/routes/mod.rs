use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

mod artifacts;
mod generate;

pub const BANNER: &str = "Image Generation Server is running";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/generate", post(generate::stream))
        .route("/generate/sync", post(generate::sync))
        .route("/download/{artifact_id}", get(artifacts::download))
        .route("/list", get(artifacts::list))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> &'static str {
    BANNER
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
