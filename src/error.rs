use thiserror::Error;

use crate::capture::PixelFormat;
use crate::player::PlayerState;
use crate::StreamId;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("No async runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Target frame rate {0} out of range 1..=120")]
    FrameRate(u32),

    #[error("Max dimension {0} must be at least 2")]
    MaxDimension(u32),

    #[error("Frame skip interval {0} out of range 1..=10")]
    SkipInterval(u32),

    #[error("Canvas area threshold {0} out of range (0, 1]")]
    AreaThreshold(f64),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: PlayerState, to: PlayerState },

    #[error("Stream already released")]
    Released,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Source image unusable ({width}x{height}, {len} bytes)")]
    InvalidSource { width: u32, height: u32, len: usize },

    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("Conversion failed: {reason}")]
    Conversion { reason: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("Payload is {actual} bytes, {width}x{height} {format:?} needs {expected}")]
    PayloadSize {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Out of memory growing frame buffer to {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Decoder rejected surface: {reason}")]
    Configure { reason: String },

    #[error("Decoder failure {code}: {message}")]
    Fatal { code: i32, message: String },
}

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("Frame {width}x{height} does not fit {len} bytes")]
    Malformed { width: u32, height: u32, len: usize },

    #[error("Draw failed: {reason}")]
    Draw { reason: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
