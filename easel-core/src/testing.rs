use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};

use crate::{
    normalize, ArtifactId, ArtifactStore, EngineError, GenerationEngine, GenerationRequest,
    NormalizeProfile, RawGenerationRequest, StoreError,
};

/// Small, fast profile so scripted runs stay cheap.
pub(crate) fn profile() -> NormalizeProfile {
    NormalizeProfile {
        steps: 4,
        width: 64,
        height: 64,
        seed_resolution: 32,
        ..NormalizeProfile::interactive()
    }
}

pub(crate) fn request(prompt: &str) -> GenerationRequest {
    normalize(&RawGenerationRequest::with_prompt(prompt), &profile())
        .expect("test prompt should normalize")
}

enum Script {
    Succeed,
    Fail(String),
    Panic,
}

/// Engine double that reports every step and records how it was called.
pub(crate) struct ScriptedEngine {
    script: Script,
    step_delay: Duration,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            script: Script::Succeed,
            step_delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            script: Script::Fail(reason.to_string()),
            ..Self::new()
        }
    }

    pub(crate) fn panicking() -> Self {
        Self {
            script: Script::Panic,
            ..Self::new()
        }
    }

    pub(crate) fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `run` calls observed.
    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<GenerationRequest> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GenerationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        for step in 1..=request.steps {
            if !self.step_delay.is_zero() {
                thread::sleep(self.step_delay);
            }
            on_step(step, request.steps);
        }

        match &self.script {
            Script::Succeed => Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                request.width,
                request.height,
                Rgb([10, 20, 30]),
            ))),
            Script::Fail(reason) => Err(EngineError::Failed(reason.clone())),
            Script::Panic => panic!("scripted engine panic"),
        }
    }
}

/// Store whose writes always fail and which never holds anything.
pub(crate) struct FailingStore;

impl ArtifactStore for FailingStore {
    fn save(&self, _bytes: &[u8]) -> Result<ArtifactId, StoreError> {
        Err(StoreError::WriteFailed(io::Error::other("disk full")))
    }

    fn load(&self, id: &ArtifactId) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::not_found(id))
    }

    fn list(&self) -> Result<Vec<ArtifactId>, StoreError> {
        Ok(Vec::new())
    }
}
