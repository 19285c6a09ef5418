//! Request validation and normalization.
//!
//! Incoming requests arrive as a loosely typed [`RawGenerationRequest`]
//! (numbers may be JSON numbers or numeric strings, every field but the
//! prompt is optional) and leave as a canonical [`GenerationRequest`] with
//! every default applied. [`normalize`] never touches the engine or the
//! artifact store.

use base64::{prelude::BASE64_STANDARD, Engine};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ValidationError;

/// Shortest output edge the normalizer accepts for explicit dimensions.
pub const MIN_EDGE: u32 = 64;
/// Longest output edge the normalizer accepts for explicit dimensions.
pub const MAX_EDGE: u32 = 2048;
/// Fixed edge that aspect-ratio dimensions are derived from.
pub const BASE_EDGE: u32 = 1080;

/// A generation request exactly as a caller submitted it.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct RawGenerationRequest {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub steps: Option<Value>,
    pub guidance_scale: Option<Value>,
    /// Base64-encoded seed image (a `data:` URL prefix is tolerated).
    pub init_image: Option<String>,
    pub strength: Option<Value>,
    pub seed: Option<Value>,
    pub width: Option<Value>,
    pub height: Option<Value>,
    pub aspect_ratio: Option<String>,
}

impl RawGenerationRequest {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }
}

/// Seed image plus the strength it is re-sampled with.
///
/// `strength` is 0 for "return the seed unchanged" and 1 for "regenerate
/// completely"; it only exists in image-to-image mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageToImage {
    pub seed_image: DynamicImage,
    pub strength: f64,
}

/// Canonical, fully defaulted generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
    pub image_to_image: Option<ImageToImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    TextToImage,
    ImageToImage,
}

impl GenerationRequest {
    pub fn mode(&self) -> GenerationMode {
        if self.image_to_image.is_some() {
            GenerationMode::ImageToImage
        } else {
            GenerationMode::TextToImage
        }
    }
}

/// Output aspect ratios offered to batch callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "1:1")]
    Square,
}

serde_plain::derive_display_from_serialize!(AspectRatio);
serde_plain::derive_fromstr_from_deserialize!(AspectRatio);

impl AspectRatio {
    /// `(width, height)` with a [`BASE_EDGE`] short side.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Widescreen => (BASE_EDGE * 16 / 9, BASE_EDGE),
            AspectRatio::Standard => (BASE_EDGE * 4 / 3, BASE_EDGE),
            AspectRatio::Square => (BASE_EDGE, BASE_EDGE),
        }
    }

    /// Parses `raw`, falling back to 16:9 (with a warning) for anything unrecognized.
    pub fn resolve(raw: &str) -> Self {
        raw.trim().parse().unwrap_or_else(|_| {
            let fallback = AspectRatio::default();
            tracing::warn!(aspect_ratio = raw, %fallback, "Unrecognized aspect ratio, using fallback");
            fallback
        })
    }
}

/// Defaults and limits applied by [`normalize`]; differs per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeProfile {
    pub steps: usize,
    pub max_steps: usize,
    pub guidance_scale: f64,
    pub strength: f64,
    pub width: u32,
    pub height: u32,
    /// Seed images are resized to this square before reaching the engine.
    pub seed_resolution: u32,
}

impl NormalizeProfile {
    /// Profile of the HTTP server.
    pub fn interactive() -> Self {
        Self {
            steps: 28,
            max_steps: 150,
            guidance_scale: 7.0,
            strength: 0.8,
            width: 1024,
            height: 1024,
            seed_resolution: 512,
        }
    }

    /// Profile of the batch CLI.
    pub fn batch() -> Self {
        Self {
            steps: 30,
            guidance_scale: 7.5,
            ..Self::interactive()
        }
    }
}

impl Default for NormalizeProfile {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Validates `raw` and applies every default from `profile`.
///
/// Seed images are decoded and resized to `profile.seed_resolution` squared;
/// the aspect ratio of the seed is deliberately not preserved.
pub fn normalize(
    raw: &RawGenerationRequest,
    profile: &NormalizeProfile,
) -> Result<GenerationRequest, ValidationError> {
    let prompt = raw
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or(ValidationError::MissingPrompt)?
        .to_string();
    let negative_prompt = raw
        .negative_prompt
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let steps = match parse_unsigned(raw.steps.as_ref(), "steps")? {
        Some(steps) => usize::try_from(steps)
            .ok()
            .filter(|steps| (1..=profile.max_steps).contains(steps))
            .ok_or(ValidationError::InvalidNumber("steps"))?,
        None => profile.steps,
    };

    let guidance_scale = parse_real(raw.guidance_scale.as_ref(), "guidance_scale")?
        .unwrap_or(profile.guidance_scale);
    if guidance_scale <= 0.0 {
        return Err(ValidationError::InvalidNumber("guidance_scale"));
    }

    let strength = parse_real(raw.strength.as_ref(), "strength")?.unwrap_or(profile.strength);
    if !(0.0..=1.0).contains(&strength) {
        return Err(ValidationError::InvalidNumber("strength"));
    }

    let seed = parse_unsigned(raw.seed.as_ref(), "seed")?;

    let (mut width, mut height) = match raw.aspect_ratio.as_deref() {
        Some(ratio) => AspectRatio::resolve(ratio).dimensions(),
        None => (profile.width, profile.height),
    };
    if let Some(w) = parse_edge(raw.width.as_ref(), "width")? {
        width = w;
    }
    if let Some(h) = parse_edge(raw.height.as_ref(), "height")? {
        height = h;
    }

    let image_to_image = match raw.init_image.as_deref().map(str::trim) {
        Some(encoded) if !encoded.is_empty() => {
            let seed_image = decode_seed_image(encoded, profile.seed_resolution)?;
            width = seed_image.width();
            height = seed_image.height();
            Some(ImageToImage {
                seed_image,
                strength,
            })
        }
        _ => None,
    };

    Ok(GenerationRequest {
        prompt,
        negative_prompt,
        steps,
        guidance_scale,
        width,
        height,
        seed,
        image_to_image,
    })
}

fn decode_seed_image(encoded: &str, resolution: u32) -> Result<DynamicImage, ValidationError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|_| ValidationError::InvalidSeedImage)?;
    let image = image::load_from_memory(&bytes).map_err(|_| ValidationError::InvalidSeedImage)?;
    let resized = image.resize_exact(resolution, resolution, FilterType::Lanczos3);
    Ok(DynamicImage::ImageRgb8(resized.to_rgb8()))
}

fn parse_unsigned(value: Option<&Value>, field: &'static str) -> Result<Option<u64>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    // `u64::MAX as f64` rounds up to 2^64, so the bound is exclusive.
    let truncate = |f: f64| {
        (f.is_finite() && f >= 0.0 && f < u64::MAX as f64).then(|| f.trunc() as u64)
    };
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    };
    parsed.map(Some).ok_or(ValidationError::InvalidNumber(field))
}

fn parse_real(value: Option<&Value>, field: &'static str) -> Result<Option<f64>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .map(Some)
        .ok_or(ValidationError::InvalidNumber(field))
}

fn parse_edge(value: Option<&Value>, field: &'static str) -> Result<Option<u32>, ValidationError> {
    match parse_unsigned(value, field)? {
        Some(edge) => u32::try_from(edge)
            .ok()
            .filter(|edge| (MIN_EDGE..=MAX_EDGE).contains(edge))
            .map(Some)
            .ok_or(ValidationError::InvalidNumber(field)),
        None => Ok(None),
    }
}
