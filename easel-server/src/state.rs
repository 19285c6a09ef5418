use std::sync::Arc;

use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{ArtifactId, Orchestrator, StoreError};
use serde_json::{json, Value};

use crate::DeliveryMode;

/// Shared state handed to every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub delivery: DeliveryMode,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, delivery: DeliveryMode) -> Self {
        Self {
            orchestrator,
            delivery,
        }
    }

    /// JSON object announcing a finished artifact.
    ///
    /// `bytes` skips the store read when the caller already holds the PNG.
    pub fn completion_body(
        &self,
        id: &ArtifactId,
        bytes: Option<&[u8]>,
    ) -> Result<Value, StoreError> {
        match self.delivery {
            DeliveryMode::Url => Ok(json!({ "image_path": download_path(id) })),
            DeliveryMode::Inline => {
                let image = match bytes {
                    Some(bytes) => BASE64_STANDARD.encode(bytes),
                    None => BASE64_STANDARD.encode(self.orchestrator.store().load(id)?),
                };
                Ok(json!({ "image": image }))
            }
        }
    }
}

pub fn download_path(id: &ArtifactId) -> String {
    format!("download/{id}")
}
