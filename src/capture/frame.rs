use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Pixel formats carried across the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 3 bytes per pixel, no alpha
    #[default]
    Rgb888,
    /// 4 bytes per pixel
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb888 => 3,
            Self::Rgba => 4,
        }
    }

    pub fn from_rgb888(use_rgb888: bool) -> Self {
        if use_rgb888 {
            Self::Rgb888
        } else {
            Self::Rgba
        }
    }

    pub fn is_rgb888(self) -> bool {
        self == Self::Rgb888
    }

    /// Byte length of a `width` x `height` frame in this format.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }

    pub fn check_len(self, width: u32, height: u32, len: usize) -> Result<(), TransportError> {
        let expected = self.frame_len(width, height);
        if expected != len {
            return Err(TransportError::PayloadSize {
                width,
                height,
                format: self,
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

/// Layout of images handed out by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Rgb8,
    Rgba8,
    Bgra8,
}

impl SourceFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

/// The decoder's most recently rendered image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: SourceFormat,
    pub data: Bytes,
    /// Presentation timestamp, if the decoder knows one
    pub timestamp_ms: Option<i64>,
}

/// Converted frame bytes on their way to the transport
#[derive(Debug, Clone, Copy)]
pub struct FramePayload<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: PixelFormat,
}

/// Metadata accompanying a frame-ready notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDescriptor {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: PixelFormat,
    /// Configuration generation the frame was accepted under
    pub generation: u64,
}

impl FrameDescriptor {
    pub fn payload_len(&self) -> usize {
        self.format.frame_len(self.width, self.height)
    }
}
