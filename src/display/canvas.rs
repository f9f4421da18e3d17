use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::CanvasError;

/// Render target on the consumer side
pub trait Canvas {
    /// Replace whatever is shown with `image`.
    fn draw(&mut self, image: RgbaImage) -> Result<(), CanvasError>;
}

/// In-memory canvas holding the last drawn frame.
///
/// With a fixed size every frame is scaled to fill it, like a 2D canvas
/// `drawImage` into the full element.
#[derive(Default)]
pub struct ImageCanvas {
    size: Option<(u32, u32)>,
    frame: Option<RgbaImage>,
    draws: u64,
}

impl ImageCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: Some((width, height)),
            ..Self::default()
        }
    }

    pub fn frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Canvas for ImageCanvas {
    fn draw(&mut self, image: RgbaImage) -> Result<(), CanvasError> {
        let image = match self.size {
            Some((0, _)) | Some((_, 0)) => {
                return Err(CanvasError::Draw {
                    reason: "canvas has no area".into(),
                })
            }
            Some((w, h)) if image.dimensions() != (w, h) => {
                imageops::resize(&image, w, h, FilterType::Triangle)
            }
            _ => image,
        };
        self.frame = Some(image);
        self.draws += 1;
        Ok(())
    }
}
