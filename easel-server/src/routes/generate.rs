//! `POST /generate` (server-sent events) and `POST /generate/sync` (JSON).
//!
//! Both validate the body before doing anything else, so a malformed
//! request is always a plain `400`, never an event stream. A fail-fast
//! server that is busy answers `503` the same way.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use easel_core::{ProgressChannel, ProgressEvent, RawGenerationRequest};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::{AppResult, AppState};

pub(super) async fn stream(
    State(state): State<AppState>,
    body: Result<Json<RawGenerationRequest>, JsonRejection>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(raw) = body?;
    let request = state.orchestrator.normalize(&raw)?;
    tracing::info!(steps = request.steps, mode = ?request.mode(), "Streaming generation");

    let events = state
        .orchestrator
        .spawn(request)?
        .map(move |event| Ok(Event::default().data(frame(&state, event).to_string())));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub(super) async fn sync(
    State(state): State<AppState>,
    body: Result<Json<RawGenerationRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(raw) = body?;
    let artifact = state
        .orchestrator
        .generate(&raw, &ProgressChannel::new())
        .await?;

    let mut response = state.completion_body(&artifact.id, Some(&artifact.bytes))?;
    response["artifact_id"] = json!(artifact.id);
    Ok(Json(response))
}

/// Wire payload of one event: `progress` in percent, the completion body,
/// or `error`.
fn frame(state: &AppState, event: ProgressEvent) -> Value {
    match event {
        ProgressEvent::Progress { fraction } => json!({ "progress": fraction * 100.0 }),
        ProgressEvent::Completed { artifact_id } => state
            .completion_body(&artifact_id, None)
            .unwrap_or_else(|err| {
                tracing::error!(%artifact_id, error = %err, "Finished artifact could not be read back");
                json!({ "error": err.to_string() })
            }),
        ProgressEvent::Failed { reason } => json!({ "error": reason }),
    }
}
