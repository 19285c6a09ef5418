//! Sequential, failure-isolated processing of many prompts.

use std::sync::Arc;

use futures::StreamExt;

use crate::{
    ArtifactId, AspectRatio, GenerateError, Orchestrator, ProgressChannel, ProgressEvent,
    RawGenerationRequest, ValidationError, ARTIFACT_EXTENSION,
};

/// Characters of the prompt kept in a derived display name.
const PROMPT_SLUG_LEN: usize = 40;

/// Outcome of one prompt in a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub sequence: u32,
    pub prompt: String,
    /// Human-readable `0007_misty_forest.png` style name. Presentation only;
    /// the artifact is stored and retrieved by its identity.
    pub display_name: String,
    pub outcome: Result<ArtifactId, GenerateError>,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn run_batch(
        &self,
        prompts: &[String],
        aspect_ratio: &str,
        start_sequence: u32,
    ) -> Result<Vec<BatchItem>, ValidationError> {
        self.run_batch_observed(prompts, aspect_ratio, start_sequence, |_, _| {})
            .await
    }

    /// Runs every prompt in order, numbering them from `start_sequence`.
    ///
    /// A failing prompt is recorded and the batch moves on. `observe`
    /// receives each prompt's progress events tagged with its sequence
    /// number. Fails without generating anything when the batch would run
    /// past the last sequence number.
    pub async fn run_batch_observed<F>(
        &self,
        prompts: &[String],
        aspect_ratio: &str,
        start_sequence: u32,
        mut observe: F,
    ) -> Result<Vec<BatchItem>, ValidationError>
    where
        F: FnMut(u32, &ProgressEvent),
    {
        let last_sequence = u32::try_from(prompts.len())
            .ok()
            .and_then(|count| start_sequence.checked_add(count.saturating_sub(1)))
            .ok_or(ValidationError::SequenceOverflow)?;

        let aspect = AspectRatio::resolve(aspect_ratio);
        let (width, height) = aspect.dimensions();
        tracing::info!(
            count = prompts.len(),
            %aspect,
            width,
            height,
            start_sequence,
            "Starting batch"
        );

        let mut items = Vec::with_capacity(prompts.len());
        for (sequence, prompt) in (start_sequence..=last_sequence).zip(prompts) {
            let raw = RawGenerationRequest {
                prompt: Some(prompt.clone()),
                aspect_ratio: Some(aspect.to_string()),
                ..Default::default()
            };
            let progress = ProgressChannel::new();
            let mut events = progress.subscribe();

            let (outcome, ()) = tokio::join!(
                self.orchestrator.generate(&raw, &progress),
                async {
                    while let Some(event) = events.next().await {
                        observe(sequence, &event);
                    }
                }
            );

            let display_name = display_name(sequence, prompt);
            match &outcome {
                Ok(artifact) => {
                    tracing::info!(sequence, artifact_id = %artifact.id, %display_name, "Batch item done")
                }
                Err(err) => tracing::warn!(sequence, error = %err, "Batch item failed"),
            }
            items.push(BatchItem {
                sequence,
                prompt: prompt.clone(),
                display_name,
                outcome: outcome.map(|artifact| artifact.id),
            });
        }
        Ok(items)
    }
}

/// `<sequence>_<slugged prompt prefix>.png`.
pub fn display_name(sequence: u32, prompt: &str) -> String {
    let mut slug = String::new();
    for c in prompt.trim().chars().take(PROMPT_SLUG_LEN) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "untitled" } else { slug };
    format!("{sequence:04}_{slug}.{ARTIFACT_EXTENSION}")
}
