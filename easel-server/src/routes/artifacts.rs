use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use easel_core::{ArtifactId, StoreError};
use serde_json::{json, Value};

use crate::{AppResult, AppState};

pub(super) async fn download(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    // Anything that does not parse as an identity cannot be in the store.
    let id = ArtifactId::parse(&artifact_id).ok_or(StoreError::NotFound(artifact_id))?;
    let bytes = state.orchestrator.store().load(&id)?;
    let disposition = format!("attachment; filename=\"{}\"", id.file_name());
    Ok((
        [
            (CONTENT_TYPE, "image/png".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

pub(super) async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let files = state.orchestrator.store().list()?;
    Ok(Json(json!({ "files": files })))
}
