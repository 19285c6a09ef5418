//! Router-level tests: every request goes through the full middleware stack
//! via `oneshot`, against a stub engine and an in-memory store.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{ArtifactId, GenerateError, SlotPolicy, StoreError};
use easel_server::{AppError, DeliveryMode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use common::*;

#[tokio::test]
async fn root_reports_liveness() {
    let app = default_app();
    let (status, body) = get(&app.router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Image Generation Server is running");
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let app = default_app();
    let (status, body) = get(&app.router, "/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body), json!({ "error": "Not found" }));
}

#[tokio::test]
async fn stream_reports_progress_then_inline_image() {
    let app = default_app();
    let (status, body) = post_json(&app.router, "/generate", json!({ "prompt": "a fox" })).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 5);
    let progress: Vec<f64> = payloads[..4]
        .iter()
        .map(|p| p["progress"].as_f64().unwrap())
        .collect();
    assert_eq!(progress, vec![25.0, 50.0, 75.0, 100.0]);

    let encoded = payloads[4]["image"].as_str().unwrap();
    let png = BASE64_STANDARD.decode(encoded).unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
    assert_eq!(app.state.orchestrator.store().list().unwrap().len(), 1);
}

#[tokio::test]
async fn stream_in_url_mode_points_at_download() {
    let app = build_test_app(DeliveryMode::Url, SlotPolicy::Queue, None);
    let (_, body) = post_json(&app.router, "/generate", json!({ "prompt": "a fox" })).await;

    let payloads = sse_payloads(&body);
    let path = payloads.last().unwrap()["image_path"].as_str().unwrap().to_string();
    let stored = app.state.orchestrator.store().list().unwrap();
    assert_eq!(path, format!("download/{}", stored[0]));

    let (status, png) = get(&app.router, &format!("/{path}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(png, app.state.orchestrator.store().load(&stored[0]).unwrap());
}

#[tokio::test]
async fn invalid_request_is_rejected_before_streaming() {
    let app = default_app();
    let (status, body) =
        post_json(&app.router, "/generate", json!({ "prompt": "x", "steps": "many" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json(&body);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"], "invalid numeric field: steps");
    assert!(app.state.orchestrator.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn engine_failure_ends_the_stream_with_an_error() {
    let app = build_test_app(DeliveryMode::Inline, SlotPolicy::Queue, Some("device lost"));
    let (status, body) = post_json(&app.router, "/generate", json!({ "prompt": "x" })).await;

    assert_eq!(status, StatusCode::OK);
    let payloads = sse_payloads(&body);
    let error = payloads.last().unwrap()["error"].as_str().unwrap();
    assert!(error.contains("device lost"));
    assert!(app.state.orchestrator.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn sync_generation_returns_artifact_and_image() {
    let app = default_app();
    let (status, body) = post_json(
        &app.router,
        "/generate/sync",
        json!({ "prompt": "a fox", "steps": "3", "seed": 7 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    let id = ArtifactId::parse(body["artifact_id"].as_str().unwrap()).unwrap();
    let png = BASE64_STANDARD.decode(body["image"].as_str().unwrap()).unwrap();
    assert_eq!(png, app.state.orchestrator.store().load(&id).unwrap());
}

#[tokio::test]
async fn sync_generation_maps_errors_to_status_codes() {
    let app = build_test_app(DeliveryMode::Inline, SlotPolicy::Queue, Some("boom"));
    let (status, body) = post_json(&app.router, "/generate/sync", json!({ "prompt": "x" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["code"], "ENGINE_ERROR");

    let (status, body) = post_json(&app.router, "/generate/sync", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "missing prompt");
}

#[tokio::test]
async fn fail_fast_reports_busy_as_503() {
    let app = build_test_app(DeliveryMode::Inline, SlotPolicy::FailFast, None);
    let held = app.state.orchestrator.engine().try_acquire().unwrap();

    let (status, body) = post_json(&app.router, "/generate/sync", json!({ "prompt": "x" })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["code"], "ENGINE_BUSY");

    drop(held);
    let (status, _) = post_json(&app.router, "/generate/sync", json!({ "prompt": "x" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn busy_fail_fast_stream_is_503_not_an_event_stream() {
    let app = build_test_app(DeliveryMode::Inline, SlotPolicy::FailFast, None);
    let held = app.state.orchestrator.engine().try_acquire().unwrap();

    let request = Request::post("/generate")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "prompt": "x" }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["content-type"], "application/json");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(json(&bytes)["code"], "ENGINE_BUSY");

    drop(held);
    let (status, body) = post_json(&app.router, "/generate", json!({ "prompt": "x" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sse_payloads(&body).last().unwrap()["image"].is_string());
    assert_eq!(app.state.orchestrator.store().list().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = default_app();
    let request = Request::post("/generate")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn download_and_list_expose_the_store() {
    let app = default_app();
    let store = app.state.orchestrator.store();
    let id = store.save(b"png bytes").unwrap();

    let (status, body) = get(&app.router, "/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), json!({ "files": [id.as_str()] }));

    let request = Request::get(format!("/download/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"png bytes");
}

#[tokio::test]
async fn unknown_or_malformed_identities_are_404() {
    let app = default_app();

    let (status, body) = get(&app.router, &format!("/download/{}", ArtifactId::generate())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["code"], "NOT_FOUND");

    let (status, _) = get(&app.router, "/download/..%2F..%2Fetc%2Fpasswd").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn store_failures_are_sanitized() {
    let err = AppError::Generate(GenerateError::Store(StoreError::WriteFailed(
        std::io::Error::other("disk full at /secret/path"),
    )));
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = json(&bytes);
    assert_eq!(body["code"], "STORE_ERROR");
    assert!(!body["error"].as_str().unwrap().contains("/secret/path"));
}
