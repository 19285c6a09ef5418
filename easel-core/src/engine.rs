//! The single shared generation engine and the slot that guards it.
//!
//! An [`EngineHandle`] is built once at start-up and cloned into whoever
//! needs it. It never decides *whether* a caller should wait: it only
//! offers [`EngineHandle::acquire`] (wait in FIFO order) and
//! [`EngineHandle::try_acquire`] (give up immediately). Holding the
//! returned [`EngineSlot`] is the only way to run the engine, and dropping
//! it is the only way to release it.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{EngineError, GenerationRequest};

/// A long-running, stateful image generator.
///
/// `run` blocks the calling thread until the image is ready and reports
/// every completed sampling step through `on_step(completed, total)`.
/// The returned image is the sole result; implementations must not expose
/// it through any other state.
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage, EngineError>;
}

#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn GenerationEngine>,
    slot: Arc<Semaphore>,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self {
            engine,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Waits for the slot; waiters are served in arrival order.
    pub async fn acquire(&self) -> Result<EngineSlot, EngineError> {
        let permit = Arc::clone(&self.slot)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Closed)?;
        Ok(self.slot_from(permit))
    }

    /// Takes the slot only if nobody holds it right now.
    pub fn try_acquire(&self) -> Option<EngineSlot> {
        Arc::clone(&self.slot)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.slot_from(permit))
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    fn slot_from(&self, permit: OwnedSemaphorePermit) -> EngineSlot {
        EngineSlot {
            engine: Arc::clone(&self.engine),
            _permit: permit,
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine.name())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Exclusive access to the engine; released on drop.
pub struct EngineSlot {
    engine: Arc<dyn GenerationEngine>,
    _permit: OwnedSemaphorePermit,
}

impl EngineSlot {
    pub fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage, EngineError> {
        tracing::debug!(
            engine = self.engine.name(),
            steps = request.steps,
            mode = ?request.mode(),
            "Running engine"
        );
        self.engine.run(request, on_step)
    }
}
