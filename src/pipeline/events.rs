//! Outbound events crossing into the consumer runtime.
//!
//! Internally everything is strongly typed; [`OutboundEvent::to_json`] is the
//! only place the boundary encoding is produced.

use serde::Serialize;
use tracing::trace;

use crate::capture::FrameDescriptor;
use crate::player::PlayerState;
use crate::StreamId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    FrameReady {
        stream_id: StreamId,
        sequence: u64,
        width: u32,
        height: u32,
        timestamp_ms: i64,
        #[serde(rename = "isRGB888")]
        is_rgb888: bool,
        #[serde(skip)]
        descriptor: FrameDescriptor,
    },
    StateChanged {
        stream_id: StreamId,
        state: PlayerState,
    },
    VideoSizeChanged {
        stream_id: StreamId,
        width: u32,
        height: u32,
    },
    Error {
        stream_id: StreamId,
        code: i32,
        message: String,
    },
    StreamReleased {
        stream_id: StreamId,
    },
}

impl OutboundEvent {
    pub fn frame_ready(stream_id: StreamId, descriptor: FrameDescriptor) -> Self {
        Self::FrameReady {
            stream_id,
            sequence: descriptor.sequence,
            width: descriptor.width,
            height: descriptor.height,
            timestamp_ms: descriptor.timestamp_ms,
            is_rgb888: descriptor.format.is_rgb888(),
            descriptor,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::FrameReady { stream_id, .. }
            | Self::StateChanged { stream_id, .. }
            | Self::VideoSizeChanged { stream_id, .. }
            | Self::Error { stream_id, .. }
            | Self::StreamReleased { stream_id } => *stream_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fire-and-forget sender for one stream's outbound events.
///
/// `FrameReady` travels on a bounded lane and is dropped when the consumer
/// lags. Every other event travels on an unbounded lane and is never dropped.
#[derive(Clone)]
pub struct EventSender {
    frames: flume::Sender<OutboundEvent>,
    control: flume::Sender<OutboundEvent>,
}

/// Consumer side of one stream's events.
///
/// Clones share the same queues, so each event reaches only one of them.
#[derive(Clone)]
pub struct StreamEvents {
    frames: flume::Receiver<OutboundEvent>,
    control: flume::Receiver<OutboundEvent>,
}

/// Event lanes for one stream, holding at most `frame_capacity` queued
/// frame-ready notifications.
pub fn channel(frame_capacity: usize) -> (EventSender, StreamEvents) {
    let (frames_tx, frames_rx) = flume::bounded(frame_capacity.max(1));
    let (control_tx, control_rx) = flume::unbounded();
    (
        EventSender {
            frames: frames_tx,
            control: control_tx,
        },
        StreamEvents {
            frames: frames_rx,
            control: control_rx,
        },
    )
}

impl EventSender {
    /// Returns false if the event was dropped.
    pub fn emit(&self, event: OutboundEvent) -> bool {
        if !matches!(event, OutboundEvent::FrameReady { .. }) {
            return self.control.send(event).is_ok();
        }
        match self.frames.try_send(event) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(event)) => {
                metrics::counter!("events_dropped_total").increment(1);
                trace!("Frame queue full, dropping {:?}", event);
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }
}

impl StreamEvents {
    /// Next event, lifecycle events first. `None` once the stream's sender
    /// is gone and both lanes are empty.
    pub async fn recv(&self) -> Option<OutboundEvent> {
        tokio::select! {
            biased;
            Ok(event) = self.control.recv_async() => Some(event),
            Ok(event) = self.frames.recv_async() => Some(event),
            else => None,
        }
    }

    pub fn try_recv(&self) -> Option<OutboundEvent> {
        self.control
            .try_recv()
            .or_else(|_| self.frames.try_recv())
            .ok()
    }

    /// Everything queued right now: lifecycle events, then frame-ready
    /// notifications, each lane in emission order.
    pub fn drain(&self) -> Vec<OutboundEvent> {
        self.control.drain().chain(self.frames.drain()).collect()
    }

    /// Frame-ready notifications waiting to be received.
    pub fn frames_queued(&self) -> usize {
        self.frames.len()
    }
}
