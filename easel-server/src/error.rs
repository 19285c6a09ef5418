use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use easel_core::{GenerateError, StoreError, ValidationError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Every variant renders as `{"error": <message>, "code": <CODE>}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Body could not be read as a generation request at all.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Generate(err.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Generate(GenerateError::Validation(err)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
            }
            AppError::Generate(GenerateError::Busy) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ENGINE_BUSY",
                GenerateError::Busy.to_string(),
            ),
            AppError::Generate(GenerateError::Engine(err)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", err.to_string())
            }
            AppError::Generate(GenerateError::Store(err)) | AppError::Store(err) => {
                classify_store_error(err)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    if err.is_not_found() {
        return (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string());
    }
    tracing::error!(error = %err, "Artifact store error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORE_ERROR",
        "An internal error occurred".to_string(),
    )
}
