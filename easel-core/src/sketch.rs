//! A lightweight sampler used when no heavyweight model is configured.
//!
//! It keeps the shape of a diffusion loop (seeded noise in, one update per
//! step, progress after every step) but the "denoiser" is a closed-form
//! pull towards a palette derived from the prompt. Image-to-image runs
//! start from the seed image blended with noise by `strength`.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::{image_to_tensor, tensor_to_image, EngineError, GenerationEngine, GenerationRequest};

/// Amount of the starting noise that survives into the final image.
const GRAIN: f64 = 0.08;

pub struct SketchEngine {
    device: Device,
}

impl SketchEngine {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    fn sample(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage> {
        let (width, height) = (request.width as usize, request.height as usize);
        let seed = request.seed.unwrap_or_else(rand::random);
        tracing::debug!(seed, width, height, "Sampling sketch");

        let noise = self.noise(seed, (3, height, width))?;
        let target = self.palette(request)?.add(&noise.affine(GRAIN, 0.0)?)?;

        let (mut latent, goal) = match &request.image_to_image {
            Some(img2img) => {
                let seed_image = if (img2img.seed_image.width(), img2img.seed_image.height())
                    == (request.width, request.height)
                {
                    img2img.seed_image.clone()
                } else {
                    img2img
                        .seed_image
                        .resize_exact(request.width, request.height, FilterType::Triangle)
                };
                let init = image_to_tensor(&seed_image, &self.device)?;
                let keep = 1.0 - img2img.strength;
                let latent = init.affine(keep, 0.0)?.add(&noise.affine(img2img.strength, 0.0)?)?;
                let goal = init.affine(keep, 0.0)?.add(&target.affine(img2img.strength, 0.0)?)?;
                (latent, goal)
            }
            None => (noise, target),
        };

        for step in 0..request.steps {
            // Cover 1/remaining of the distance so the final step lands on the goal.
            let remaining = (request.steps - step) as f64;
            latent = latent.add(&goal.sub(&latent)?.affine(1.0 / remaining, 0.0)?)?;
            on_step(step + 1, request.steps);
        }

        let img = ((latent.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?
            .round()?
            .to_dtype(DType::U8)?;
        tensor_to_image(&img)
    }

    fn noise(&self, seed: u64, shape: (usize, usize, usize)) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(seed);
        let len = shape.0 * shape.1 * shape.2;
        let values: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect();
        Ok(Tensor::from_vec(values, shape, &self.device)?)
    }

    /// Prompt colour, pushed away from the negative prompt's colour and
    /// saturated by the guidance scale, with a top-to-bottom light falloff.
    fn palette(&self, request: &GenerationRequest) -> Result<Tensor> {
        let (width, height) = (request.width as usize, request.height as usize);
        let positive = prompt_color(&request.prompt);
        let negative = if request.negative_prompt.is_empty() {
            [0.0; 3]
        } else {
            prompt_color(&request.negative_prompt)
        };
        let saturation = (request.guidance_scale / (request.guidance_scale + 1.0)) as f32;
        let color: Vec<f32> = positive
            .iter()
            .zip(negative)
            .map(|(p, n)| ((p - 0.5 * n) * saturation).clamp(-1.0, 1.0))
            .collect();

        let color = Tensor::from_vec(color, (3, 1, 1), &self.device)?;
        let falloff = Tensor::arange(0u32, height as u32, &self.device)?
            .to_dtype(DType::F32)?
            .affine(-0.4 / height as f64, 1.0)?
            .reshape((1, height, 1))?;
        Ok(color
            .broadcast_mul(&falloff)?
            .broadcast_as((3, height, width))?
            .contiguous()?)
    }
}

impl GenerationEngine for SketchEngine {
    fn name(&self) -> &str {
        "sketch"
    }

    fn run(
        &self,
        request: &GenerationRequest,
        on_step: &mut dyn FnMut(usize, usize),
    ) -> Result<DynamicImage, EngineError> {
        self.sample(request, on_step)
            .map_err(|err| EngineError::Failed(format!("{err:#}")))
    }
}

fn prompt_color(prompt: &str) -> [f32; 3] {
    let digest = Sha256::digest(prompt.as_bytes());
    [digest[0], digest[1], digest[2]].map(|byte| byte as f32 / 127.5 - 1.0)
}
