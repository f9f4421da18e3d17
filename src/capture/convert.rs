//! Downscale and pixel-format conversion for captured images

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, Rgba};
use tracing::trace;

use super::frame::{DecodedImage, FramePayload, PixelFormat, SourceFormat};
use crate::error::CaptureError;
use crate::utils;

pub const DEFAULT_MAX_DIMENSION: u32 = 320;

/// Output size with `max(width, height) <= max_dimension`, aspect ratio preserved.
pub fn target_size(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / longest as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_dimension);
    (scaled(width), scaled(height))
}

/// Turns decoder images into transport payloads.
///
/// The output buffer is reused across frames and only ever grows.
pub struct FrameConverter {
    max_dimension: u32,
    scratch: Vec<u8>,
}

impl FrameConverter {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension,
            scratch: Vec::new(),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn convert(
        &mut self,
        image: &DecodedImage,
        format: PixelFormat,
    ) -> Result<FramePayload<'_>, CaptureError> {
        let start = Instant::now();
        let src_bpp = image.format.bytes_per_pixel();
        let src_len = image.width as usize * image.height as usize * src_bpp;

        if image.width <= 1 || image.height <= 1 || image.data.len() < src_len {
            return Err(CaptureError::InvalidSource {
                width: image.width,
                height: image.height,
                len: image.data.len(),
            });
        }

        let (width, height) = target_size(image.width, image.height, self.max_dimension);
        let source = &image.data[..src_len];
        let resized = if (width, height) != (image.width, image.height) {
            Some(resize_nearest(source, image, width, height)?)
        } else {
            None
        };
        let pixels = resized.as_deref().unwrap_or(source);

        write_pixels(pixels, image.format, format, &mut self.scratch)?;

        let elapsed = start.elapsed();
        metrics::histogram!("convert_time_us").record(elapsed.as_micros() as f64);
        trace!(
            "Converted {}x{} -> {}x{} {:?} in {:?}",
            image.width,
            image.height,
            width,
            height,
            format,
            elapsed
        );

        Ok(FramePayload {
            data: &self.scratch,
            width,
            height,
            timestamp_ms: image.timestamp_ms.unwrap_or_else(utils::now_ms),
            format,
        })
    }

    /// Give the scratch allocation back after an allocation failure.
    pub fn reclaim(&mut self) {
        self.scratch = Vec::new();
    }
}

fn resize_nearest(
    source: &[u8],
    image: &DecodedImage,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CaptureError> {
    let malformed = || CaptureError::Conversion {
        reason: format!("{}x{} buffer does not match layout", image.width, image.height),
    };

    // Nearest never mixes channels, so BGRA resizes fine as RGBA.
    let raw = match image.format {
        SourceFormat::Rgb8 => {
            let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(image.width, image.height, source)
                .ok_or_else(malformed)?;
            imageops::resize(&view, width, height, FilterType::Nearest).into_raw()
        }
        SourceFormat::Rgba8 | SourceFormat::Bgra8 => {
            let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(image.width, image.height, source)
                .ok_or_else(malformed)?;
            imageops::resize(&view, width, height, FilterType::Nearest).into_raw()
        }
    };
    Ok(raw)
}

fn write_pixels(
    pixels: &[u8],
    source: SourceFormat,
    target: PixelFormat,
    out: &mut Vec<u8>,
) -> Result<(), CaptureError> {
    let src_bpp = source.bytes_per_pixel();
    let needed = pixels.len() / src_bpp * target.bytes_per_pixel();

    out.clear();
    out.try_reserve_exact(needed)
        .map_err(|_| CaptureError::OutOfMemory { bytes: needed })?;

    for px in pixels.chunks_exact(src_bpp) {
        let (r, g, b) = match source {
            SourceFormat::Bgra8 => (px[2], px[1], px[0]),
            SourceFormat::Rgb8 | SourceFormat::Rgba8 => (px[0], px[1], px[2]),
        };
        out.extend_from_slice(&[r, g, b]);
        if target == PixelFormat::Rgba {
            out.push(if src_bpp == 4 { px[3] } else { 255 });
        }
    }
    Ok(())
}
