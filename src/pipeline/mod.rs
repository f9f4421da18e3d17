pub mod events;
pub mod skip;
pub mod slot;
pub mod transport;

pub use events::{EventSender, OutboundEvent, StreamEvents};
pub use skip::SkipPolicy;
pub use slot::{double_buffer, FrameSink, FrameSource, PublishedFrame, SlotReader, SlotWriter};
pub use transport::{
    CaptureTicket, DiscardReason, FrameTransport, Reconfigure, StreamTransport, SubmitOutcome,
    TransportSettings, TransportStatsSnapshot,
};
