pub mod convert;
pub mod decoder;
pub mod frame;
pub mod sampler;

pub use convert::{target_size, FrameConverter, DEFAULT_MAX_DIMENSION};
pub use decoder::{DecoderEvent, RenderSurface, SyntheticDecoder, VideoDecoder};
pub use frame::{DecodedImage, FrameDescriptor, FramePayload, PixelFormat, SourceFormat};
pub use sampler::{capture_period, CaptureOutcome, FrameSampler};
