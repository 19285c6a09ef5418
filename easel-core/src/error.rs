use std::time::Duration;

use crate::ArtifactId;

/// Caller input that cannot be turned into a [`GenerationRequest`](crate::GenerationRequest).
///
/// Always reported straight back to the caller; never retried, and never
/// reached after the engine has been touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing prompt")]
    MissingPrompt,

    #[error("invalid numeric field: {0}")]
    InvalidNumber(&'static str),

    #[error("invalid seed image")]
    InvalidSeedImage,

    /// A batch would need sequence numbers past `u32::MAX`.
    #[error("sequence numbers exhausted")]
    SequenceOverflow,
}

/// Failure of the shared generation resource.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine itself reported a failure (device fault, OOM, rejected parameters).
    #[error("engine failure: {0}")]
    Failed(String),

    #[error("generation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("engine panicked during generation")]
    Panicked,

    /// The engine produced an image that could not be encoded for storage.
    #[error("failed to encode generated image: {0}")]
    Encode(String),

    #[error("engine slot is closed")]
    Closed,
}

/// Persistence failures of the [`ArtifactStore`](crate::ArtifactStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("artifact {0} not found")]
    NotFound(String),
}

impl StoreError {
    pub fn not_found(id: &ArtifactId) -> Self {
        Self::NotFound(id.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Outcome of a single generation call that did not produce an artifact.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Fail-fast policy only: another generation holds the engine slot.
    #[error("engine busy")]
    Busy,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerateError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
