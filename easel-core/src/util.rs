use std::io::Cursor;

use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, ImageFormat};

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            tracing::warn!("Running on CPU, to run on GPU (metal), build with `--features metal`");
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            tracing::warn!("Running on CPU, to run on GPU, build with `--features cuda`");
            Ok(Device::Cpu)
        }
    }
}

/// Converts a `u8` tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| anyhow::anyhow!("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Converts an image into an `f32` tensor with shape (3, height, width) and values in [-1, 1].
pub fn image_to_tensor(img: &DynamicImage, device: &Device) -> Result<Tensor> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let tensor = Tensor::from_vec(rgb.into_raw(), (height as usize, width as usize, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;
    Ok(tensor.affine(1.0 / 127.5, -1.0)?)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn image_tensor_round_trip_keeps_pixels() -> Result<()> {
        let mut source = RgbImage::new(4, 2);
        source.put_pixel(3, 1, Rgb([255, 0, 128]));
        let source = DynamicImage::ImageRgb8(source);

        let tensor = image_to_tensor(&source, &Device::Cpu)?;
        assert_eq!(tensor.dims3()?, (3, 2, 4));

        let back = ((tensor + 1.0)? * 127.5)?.round()?.to_dtype(DType::U8)?;
        assert_eq!(tensor_to_image(&back)?, source);
        Ok(())
    }

    #[test]
    fn png_encoding_produces_a_decodable_image() -> Result<()> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])));
        let bytes = encode_png(&img)?;
        assert_eq!(image::load_from_memory(&bytes)?.to_rgb8(), img.to_rgb8());
        Ok(())
    }

    #[test]
    fn forced_cpu_selects_cpu() -> Result<()> {
        assert!(matches!(select_best_device(DeviceMap::ForceCpu)?, Device::Cpu));
        Ok(())
    }
}
