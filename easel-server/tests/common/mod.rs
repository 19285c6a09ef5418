use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use easel_core::{
    EngineError, EngineHandle, GenerationEngine, GenerationRequest, MemoryArtifactStore,
    NormalizeProfile, Orchestrator, OrchestratorConfig, SlotPolicy,
};
use easel_server::{build_router, AppState, DeliveryMode};
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use tower::ServiceExt;

/// Engine stand-in: reports every step, then returns a flat image, or
/// fails with `failure` when set.
pub struct StubEngine {
    pub failure: Option<String>,
}

impl GenerationEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage, EngineError> {
        for step in 1..=request.steps {
            on_step(step, request.steps);
        }
        match &self.failure {
            Some(reason) => Err(EngineError::Failed(reason.clone())),
            None => Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                request.width,
                request.height,
                Rgb([120, 60, 200]),
            ))),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn test_profile() -> NormalizeProfile {
    NormalizeProfile {
        steps: 4,
        width: 64,
        height: 64,
        seed_resolution: 32,
        ..NormalizeProfile::interactive()
    }
}

pub fn build_test_app(delivery: DeliveryMode, policy: SlotPolicy, failure: Option<&str>) -> TestApp {
    let engine = StubEngine {
        failure: failure.map(str::to_string),
    };
    let config = OrchestratorConfig {
        policy,
        run_timeout: Duration::from_secs(30),
        profile: test_profile(),
    };
    let orchestrator = Orchestrator::new(
        EngineHandle::new(Arc::new(engine)),
        Arc::new(MemoryArtifactStore::new()),
        config,
    );
    let state = AppState::new(Arc::new(orchestrator), delivery);
    TestApp {
        router: build_router(state.clone()),
        state,
    }
}

pub fn default_app() -> TestApp {
    build_test_app(DeliveryMode::Inline, SlotPolicy::Queue, None)
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, Vec<u8>) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

pub fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

/// Payloads of every `data:` line of a server-sent event stream.
pub fn sse_payloads(bytes: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}
