//! Drives one generation from raw request to stored artifact.
//!
//! ```text
//! raw request -> normalize -> acquire slot -> engine.run (progress) -> encode -> store
//! ```
//!
//! Every call ends with exactly one terminal event on its
//! [`ProgressChannel`]. Failures at any stage leave the store untouched, and
//! the engine slot is released when the engine call returns, whether it
//! succeeded, failed, panicked or was abandoned by a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    encode_png, normalize, Artifact, ArtifactStore, EngineError, EngineHandle, EngineSlot,
    GenerateError, GenerationRequest, NormalizeProfile, ProgressChannel, ProgressEvent,
    ProgressStream, RawGenerationRequest, ValidationError,
};

/// What a caller experiences when the engine is already in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotPolicy {
    /// Wait for the slot; generations run one at a time in arrival order.
    #[default]
    Queue,
    /// Reject with [`GenerateError::Busy`] instead of waiting.
    FailFast,
}

serde_plain::derive_display_from_serialize!(SlotPolicy);
serde_plain::derive_fromstr_from_deserialize!(SlotPolicy);

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub policy: SlotPolicy,
    /// Upper bound on one engine call; exceeding it counts as an engine failure.
    pub run_timeout: Duration,
    pub profile: NormalizeProfile,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: SlotPolicy::default(),
            run_timeout: Duration::from_secs(600),
            profile: NormalizeProfile::default(),
        }
    }
}

pub struct Orchestrator {
    engine: EngineHandle,
    store: Arc<dyn ArtifactStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn ArtifactStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validation only; lets shells reject bad input before opening a stream.
    pub fn normalize(&self, raw: &RawGenerationRequest) -> Result<GenerationRequest, ValidationError> {
        normalize(raw, &self.config.profile)
    }

    /// Normalizes `raw` and runs it, reporting on `progress`.
    ///
    /// Validation failures are reported without ever touching the engine.
    pub async fn generate(
        &self,
        raw: &RawGenerationRequest,
        progress: &ProgressChannel,
    ) -> Result<Artifact, GenerateError> {
        match self.normalize(raw) {
            Ok(request) => self.generate_normalized(request, progress).await,
            Err(err) => {
                tracing::info!(error = %err, "Rejected generation request");
                progress.emit(ProgressEvent::failed(&err));
                Err(err.into())
            }
        }
    }

    pub async fn generate_normalized(
        &self,
        request: GenerationRequest,
        progress: &ProgressChannel,
    ) -> Result<Artifact, GenerateError> {
        self.run_and_report(request, None, progress).await
    }

    /// Runs `request` on a background task and returns its event stream.
    ///
    /// Under [`SlotPolicy::FailFast`] the slot is claimed before the task
    /// starts, so a busy engine is reported here instead of on the stream.
    pub fn spawn(self: &Arc<Self>, request: GenerationRequest) -> Result<ProgressStream, GenerateError> {
        let reserved = match self.config.policy {
            SlotPolicy::Queue => None,
            SlotPolicy::FailFast => match self.engine.try_acquire() {
                Some(slot) => Some(slot),
                None => {
                    tracing::info!("Rejected generation: engine busy");
                    return Err(GenerateError::Busy);
                }
            },
        };
        let progress = ProgressChannel::new();
        let events = progress.subscribe();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            // The outcome is already reported through the channel.
            let _ = orchestrator.run_and_report(request, reserved, &progress).await;
        });
        Ok(events)
    }

    async fn run_and_report(
        &self,
        request: GenerationRequest,
        reserved: Option<EngineSlot>,
        progress: &ProgressChannel,
    ) -> Result<Artifact, GenerateError> {
        let started = Instant::now();
        let outcome = self.execute(request, reserved, progress).await;
        match &outcome {
            Ok(artifact) => {
                tracing::info!(
                    artifact_id = %artifact.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generation completed"
                );
                progress.emit(ProgressEvent::Completed {
                    artifact_id: artifact.id.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "Generation failed");
                progress.emit(ProgressEvent::failed(err));
            }
        }
        outcome
    }

    async fn acquire_slot(&self) -> Result<EngineSlot, GenerateError> {
        match self.config.policy {
            SlotPolicy::Queue => Ok(self.engine.acquire().await?),
            SlotPolicy::FailFast => self.engine.try_acquire().ok_or(GenerateError::Busy),
        }
    }

    async fn execute(
        &self,
        request: GenerationRequest,
        reserved: Option<EngineSlot>,
        progress: &ProgressChannel,
    ) -> Result<Artifact, GenerateError> {
        let slot = match reserved {
            Some(slot) => slot,
            None => self.acquire_slot().await?,
        };
        tracing::info!(
            engine = self.engine.name(),
            steps = request.steps,
            width = request.width,
            height = request.height,
            mode = ?request.mode(),
            "Acquired engine slot"
        );

        let channel = progress.clone();
        let task = tokio::task::spawn_blocking(move || {
            let image = slot.run(&request, &mut |completed, total| {
                if let Some(event) = ProgressEvent::step(completed, total) {
                    channel.emit(event);
                }
            });
            drop(slot);
            encode_png(&image?).map_err(|err| EngineError::Encode(format!("{err:#}")))
        });

        let bytes = match tokio::time::timeout(self.config.run_timeout, task).await {
            Ok(Ok(encoded)) => encoded?,
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "Engine task aborted");
                return Err(EngineError::Panicked.into());
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.run_timeout.as_secs(),
                    "Engine call timed out; slot stays held until it returns"
                );
                return Err(EngineError::TimedOut(self.config.run_timeout).into());
            }
        };

        let id = self.store.save(&bytes)?;
        Ok(Artifact {
            id,
            bytes,
            created_at: Utc::now(),
        })
    }
}
