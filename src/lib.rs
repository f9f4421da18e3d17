pub mod capture;
pub mod display;
pub mod error;
pub mod mode;
pub mod pipeline;
pub mod player;
pub mod stream;
pub mod utils;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use capture::{PixelFormat, DEFAULT_MAX_DIMENSION};
use error::ConfigError;
use mode::{LayoutRect, ScreenSize, DEFAULT_CANVAS_AREA_THRESHOLD};

pub use capture::{DecodedImage, DecoderEvent, FrameDescriptor, SyntheticDecoder, VideoDecoder};
pub use display::{Canvas, ImageCanvas, RenderLoop};
pub use error::{PipelineError, Result};
pub use mode::RenderMode;
pub use pipeline::{FrameTransport, OutboundEvent, StreamTransport};
pub use player::PlayerState;
pub use stream::VideoStream;

/// Identifier of one stream, unique within a [`FrameTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub mode: ModeConfig,
    pub render: RenderConfig,
    pub transport: TransportConfig,
}

/// Per-stream pipeline settings, fixed at creation except where reconfigured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    #[serde(alias = "targetFrameRate")]
    pub target_frame_rate: u32,
    #[serde(alias = "maxDimension")]
    pub max_dimension: u32,
    #[serde(alias = "colorFormat")]
    pub color_format: PixelFormat,
    #[serde(alias = "frameSkipEnabled")]
    pub frame_skip_enabled: bool,
    #[serde(alias = "frameSkipInterval")]
    pub frame_skip_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub canvas_area_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub notification_queue: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_frame_rate: 15,
            max_dimension: DEFAULT_MAX_DIMENSION,
            color_format: PixelFormat::Rgb888,
            frame_skip_enabled: false,
            frame_skip_interval: 1,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            canvas_area_threshold: DEFAULT_CANVAS_AREA_THRESHOLD,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            notification_queue: 64,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=120).contains(&self.target_frame_rate) {
            return Err(ConfigError::FrameRate(self.target_frame_rate));
        }
        if self.max_dimension < 2 {
            return Err(ConfigError::MaxDimension(self.max_dimension));
        }
        pipeline::skip::validate_interval(self.frame_skip_interval)?;
        Ok(())
    }
}

impl Config {
    /// Layer an optional TOML file and `FRAMEWIRE__SECTION__KEY` environment
    /// variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("FRAMEWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;
        mode::ModeSelector::new(self.mode.canvas_area_threshold)?;
        if self.render.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "render.poll_interval_ms",
                reason: "must be positive".into(),
            });
        }
        if self.transport.notification_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.notification_queue",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Creation payload sent by the host when playback is requested
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayRequest {
    pub layout: LayoutRect,
    pub screen: ScreenSize,
    pub target_frame_rate: Option<u32>,
    pub max_dimension: Option<u32>,
    #[serde(rename = "useRGB888")]
    pub use_rgb888: Option<bool>,
    pub frame_skip_enabled: Option<bool>,
    pub frame_skip_interval: Option<u32>,
}

impl PlayRequest {
    pub fn from_json(payload: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Overlay the request's overrides on `defaults` and validate the result.
    pub fn stream_config(&self, defaults: &StreamConfig) -> Result<StreamConfig, ConfigError> {
        let config = StreamConfig {
            target_frame_rate: self.target_frame_rate.unwrap_or(defaults.target_frame_rate),
            max_dimension: self.max_dimension.unwrap_or(defaults.max_dimension),
            color_format: self
                .use_rgb888
                .map(PixelFormat::from_rgb888)
                .unwrap_or(defaults.color_format),
            frame_skip_enabled: self.frame_skip_enabled.unwrap_or(defaults.frame_skip_enabled),
            frame_skip_interval: self.frame_skip_interval.unwrap_or(defaults.frame_skip_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.stream.target_frame_rate, 15);
        assert_eq!(config.stream.max_dimension, 320);
        assert_eq!(config.stream.color_format, PixelFormat::Rgb888);
    }

    #[test]
    fn play_request_overrides_defaults() {
        let request = PlayRequest::from_json(
            r#"{
                "layout": {"x": 10, "y": 20, "width": 320, "height": 180},
                "screen": {"width": 1920, "height": 1080},
                "targetFrameRate": 24,
                "useRGB888": false
            }"#,
        )
        .unwrap();
        let config = request.stream_config(&StreamConfig::default()).unwrap();
        assert_eq!(config.target_frame_rate, 24);
        assert_eq!(config.color_format, PixelFormat::Rgba);
        assert_eq!(config.max_dimension, 320);
        assert!(request.layout.visible);
    }

    #[test]
    fn malformed_request_is_rejected() {
        assert!(matches!(
            PlayRequest::from_json("{\"targetFrameRate\": \"fast\"}"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn out_of_range_request_is_rejected() {
        let request = PlayRequest {
            frame_skip_interval: Some(11),
            ..PlayRequest::default()
        };
        assert!(matches!(
            request.stream_config(&StreamConfig::default()),
            Err(ConfigError::SkipInterval(11))
        ));

        let request = PlayRequest {
            target_frame_rate: Some(0),
            ..PlayRequest::default()
        };
        assert!(matches!(
            request.stream_config(&StreamConfig::default()),
            Err(ConfigError::FrameRate(0))
        ));
    }

    #[test]
    fn loads_toml_file() {
        let dir = std::env::temp_dir().join(format!("framewire-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("framewire.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[stream]\ntarget_frame_rate = 30\ncolor_format = \"rgba\"\n\n[mode]\ncanvas_area_threshold = 0.25"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.stream.target_frame_rate, 30);
        assert_eq!(config.stream.color_format, PixelFormat::Rgba);
        assert_eq!(config.stream.max_dimension, 320);
        assert_eq!(config.mode.canvas_area_threshold, 0.25);
        assert_eq!(config.render.poll_interval_ms, 100);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
