//! Picks frame delivery or the platform overlay for a new stream.
//!
//! Evaluated once at creation; switching modes means recreating the stream.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_CANVAS_AREA_THRESHOLD: f64 = 0.4;

/// Host-supplied placement of the video element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
}

impl LayoutRect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

impl Default for LayoutRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Frames are delivered through the transport and drawn by the consumer
    Canvas,
    /// Handed to the platform compositor; no frames cross the boundary
    Overlay,
}

#[derive(Debug, Clone, Copy)]
pub struct ModeSelector {
    threshold: f64,
}

impl ModeSelector {
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::AreaThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Surfaces covering less than the threshold share of the screen use
    /// frame delivery. An unknown screen size also picks frame delivery.
    pub fn select(&self, layout: &LayoutRect, screen: ScreenSize) -> RenderMode {
        let screen_area = screen.area();
        if screen_area <= 0.0 {
            return RenderMode::Canvas;
        }
        let ratio = layout.area() / screen_area;
        let mode = if ratio < self.threshold {
            RenderMode::Canvas
        } else {
            RenderMode::Overlay
        };
        debug!("Surface covers {:.1}% of screen, using {:?}", ratio * 100.0, mode);
        mode
    }
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CANVAS_AREA_THRESHOLD,
        }
    }
}
