//! Decoder collaborator seam.
//!
//! The pipeline only needs three things from a decoder: somewhere to render,
//! the last image it rendered, and playback-state callbacks (delivered as
//! [`DecoderEvent`]s through [`crate::VideoStream::on_decoder_event`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use super::frame::{DecodedImage, SourceFormat};
use crate::error::DecoderError;

/// Off-screen render target handed to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSurface {
    pub width: u32,
    pub height: u32,
}

/// Playback-state callbacks raised by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    Prepared,
    BufferingStart,
    BufferingEnd,
    Completed,
    VideoSizeChanged { width: u32, height: u32 },
    Error { code: i32, message: String },
}

pub trait VideoDecoder: Send + Sync + 'static {
    /// Point the decoder at its render target.
    fn configure(&self, surface: RenderSurface) -> Result<(), DecoderError>;

    /// Whatever the decoder rendered last, if anything.
    fn current_image(&self) -> Option<DecodedImage>;
}

/// Test-pattern decoder: every call to [`VideoDecoder::current_image`] renders a
/// new frame whose pixels encode the frame counter.
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    format: SourceFormat,
    frames: AtomicU64,
    surface: Mutex<Option<RenderSurface>>,
}

impl SyntheticDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_format(width, height, SourceFormat::Rgba8)
    }

    pub fn with_format(width: u32, height: u32, format: SourceFormat) -> Self {
        Self {
            width,
            height,
            format,
            frames: AtomicU64::new(0),
            surface: Mutex::new(None),
        }
    }

    /// Number of images handed out so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn surface(&self) -> Option<RenderSurface> {
        self.surface.lock().ok().and_then(|s| *s)
    }

    fn render(&self, index: u64) -> Bytes {
        let bpp = self.format.bytes_per_pixel();
        let mut data = vec![0u8; self.width as usize * self.height as usize * bpp];
        let shade = (index % 256) as u8;
        for (i, px) in data.chunks_exact_mut(bpp).enumerate() {
            let x = (i % self.width as usize) as u8;
            px[0] = shade;
            px[1] = x;
            px[2] = shade.wrapping_add(x);
            if bpp == 4 {
                px[3] = 255;
            }
        }
        Bytes::from(data)
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn configure(&self, surface: RenderSurface) -> Result<(), DecoderError> {
        if surface.width == 0 || surface.height == 0 {
            return Err(DecoderError::Configure {
                reason: format!("empty surface {}x{}", surface.width, surface.height),
            });
        }
        if let Ok(mut slot) = self.surface.lock() {
            *slot = Some(surface);
        }
        Ok(())
    }

    fn current_image(&self) -> Option<DecodedImage> {
        let index = self.frames.fetch_add(1, Ordering::Relaxed);
        Some(DecodedImage {
            width: self.width,
            height: self.height,
            format: self.format,
            data: self.render(index),
            timestamp_ms: Some((index * 1000 / 30) as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_have_expected_size() {
        let decoder = SyntheticDecoder::with_format(4, 2, SourceFormat::Rgb8);
        let image = decoder.current_image().unwrap();
        assert_eq!(image.data.len(), 4 * 2 * 3);
        assert_eq!(decoder.frames_rendered(), 1);
    }

    #[test]
    fn configure_rejects_empty_surface() {
        let decoder = SyntheticDecoder::new(4, 4);
        assert!(decoder
            .configure(RenderSurface {
                width: 0,
                height: 10
            })
            .is_err());
        decoder
            .configure(RenderSurface {
                width: 10,
                height: 10,
            })
            .unwrap();
        assert_eq!(
            decoder.surface(),
            Some(RenderSurface {
                width: 10,
                height: 10
            })
        );
    }
}
