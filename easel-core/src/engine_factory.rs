use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::{select_best_device, DeviceMap, GenerationEngine, SketchEngine};

/// Engines this build knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Sketch,
    // Model-backed engines plug in here.
}

impl EngineKind {
    /// Detect engine kind from a model name.
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("SKETCH") {
            Some(EngineKind::Sketch)
        } else {
            None
        }
    }
}

/// Builds the process-wide engine for `model_name`.
pub fn load_engine(model_name: &str, device_map: DeviceMap) -> Result<Arc<dyn GenerationEngine>> {
    let kind = EngineKind::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported engine: {model_name}"))?;

    tracing::info!(model = model_name, ?kind, ?device_map, "Loading engine");

    match kind {
        EngineKind::Sketch => {
            let device = select_best_device(device_map).context("failed to set up device")?;
            Ok(Arc::new(SketchEngine::new(device)))
        }
    }
}
