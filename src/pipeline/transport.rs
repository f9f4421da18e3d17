//! Frame transport: skip policy, double-buffered storage, sequencing and
//! frame-ready notifications, one [`StreamTransport`] per stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use tracing::{debug, info, trace, warn};

use super::events::{self, EventSender, OutboundEvent, StreamEvents};
use super::skip::{self, SkipPolicy};
use super::slot::{double_buffer, FrameSink, FrameSource, PublishedFrame, SlotReader, SlotWriter};
use crate::capture::{FrameDescriptor, FramePayload, PixelFormat};
use crate::error::{ConfigError, TransportError};
use crate::utils::FpsMeter;
use crate::{StreamConfig, StreamId};

/// Configuration change applied with [`StreamTransport::reconfigure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigure {
    ColorFormat(PixelFormat),
    FrameSkipEnabled(bool),
    FrameSkipInterval(u32),
}

/// Snapshot of the transport's live settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub format: PixelFormat,
    pub skip_enabled: bool,
    pub skip_interval: u32,
    pub generation: u64,
}

/// Issued while capture is open; submissions must present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    epoch: u64,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Capture was stopped while the frame was being converted
    CaptureStopped,
    /// Color format was reconfigured while the frame was being converted
    FormatChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(FrameDescriptor),
    Skipped,
    Discarded(DiscardReason),
}

#[derive(Default)]
struct TransportStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub skipped: u64,
    pub discarded: u64,
}

struct TransportState {
    writer: SlotWriter,
    sequence: u64,
    skip: SkipPolicy,
    format: PixelFormat,
    generation: u64,
    /// Epoch of the currently open capture window
    gate: Option<u64>,
    last_epoch: u64,
    fps: FpsMeter,
}

pub struct StreamTransport {
    id: StreamId,
    state: Mutex<TransportState>,
    reader: SlotReader,
    events: EventSender,
    subscription: StreamEvents,
    stats: CachePadded<TransportStats>,
}

impl StreamTransport {
    /// `notification_queue` bounds the frame-ready notifications waiting for
    /// a consumer; lifecycle events are never dropped.
    pub fn new(
        id: StreamId,
        config: &StreamConfig,
        notification_queue: usize,
    ) -> Result<Self, ConfigError> {
        let (writer, reader) = double_buffer();
        let (events, subscription) = events::channel(notification_queue);
        let skip = SkipPolicy::new(config.frame_skip_enabled, config.frame_skip_interval)?;
        Ok(Self {
            id,
            state: Mutex::new(TransportState {
                writer,
                sequence: 0,
                skip,
                format: config.color_format,
                generation: 0,
                gate: None,
                last_epoch: 0,
                fps: FpsMeter::new(30),
            }),
            reader,
            events,
            subscription,
            stats: CachePadded::new(TransportStats::default()),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Events of this stream only. Subscriptions share one queue.
    pub fn subscribe(&self) -> StreamEvents {
        self.subscription.clone()
    }

    pub fn emit(&self, event: OutboundEvent) -> bool {
        self.events.emit(event)
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new capture window. Tickets from earlier windows stay invalid.
    pub fn open_gate(&self) {
        let mut state = self.lock();
        state.last_epoch += 1;
        state.gate = Some(state.last_epoch);
        debug!("Stream {} capture opened (epoch {})", self.id, state.last_epoch);
    }

    /// Close the capture window. Once this returns no further frame is
    /// accepted until the gate is opened again.
    pub fn close_gate(&self) {
        let mut state = self.lock();
        if state.gate.take().is_some() {
            debug!("Stream {} capture closed", self.id);
        }
    }

    pub fn ticket(&self) -> Option<CaptureTicket> {
        let state = self.lock();
        state.gate.map(|epoch| CaptureTicket {
            epoch,
            format: state.format,
        })
    }

    pub fn submit(
        &self,
        ticket: CaptureTicket,
        payload: FramePayload<'_>,
    ) -> Result<SubmitOutcome, TransportError> {
        let mut state = self.lock();
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if state.gate != Some(ticket.epoch) {
            return Ok(self.discard(DiscardReason::CaptureStopped));
        }
        if payload.format != state.format {
            return Ok(self.discard(DiscardReason::FormatChanged));
        }
        if let Err(e) = payload
            .format
            .check_len(payload.width, payload.height, payload.data.len())
        {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        if !state.skip.admit() {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_skipped_total").increment(1);
            trace!("Stream {} skipped frame", self.id);
            return Ok(SubmitOutcome::Skipped);
        }

        let descriptor = FrameDescriptor {
            sequence: state.sequence + 1,
            width: payload.width,
            height: payload.height,
            timestamp_ms: payload.timestamp_ms,
            format: payload.format,
            generation: state.generation,
        };
        state.writer.publish(payload.data, descriptor)?;
        state.sequence = descriptor.sequence;
        state.fps.tick(Instant::now());

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_accepted_total").increment(1);
        metrics::gauge!("capture_fps").set(state.fps.fps());

        // Emitted under the lock so notifications leave in sequence order.
        self.events.emit(OutboundEvent::frame_ready(self.id, descriptor));
        Ok(SubmitOutcome::Accepted(descriptor))
    }

    fn discard(&self, reason: DiscardReason) -> SubmitOutcome {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_discarded_total").increment(1);
        trace!("Stream {} discarded frame: {:?}", self.id, reason);
        SubmitOutcome::Discarded(reason)
    }

    /// Apply a configuration change; returns the generation it took effect in.
    pub fn reconfigure(&self, change: Reconfigure) -> Result<u64, ConfigError> {
        let mut state = self.lock();
        match change {
            Reconfigure::ColorFormat(format) => state.format = format,
            Reconfigure::FrameSkipEnabled(enabled) => state.skip.set_enabled(enabled),
            Reconfigure::FrameSkipInterval(interval) => state.skip.set_interval(interval)?,
        }
        state.generation += 1;
        info!(
            "Stream {} reconfigured {:?} (generation {})",
            self.id, change, state.generation
        );
        Ok(state.generation)
    }

    pub fn settings(&self) -> TransportSettings {
        let state = self.lock();
        TransportSettings {
            format: state.format,
            skip_enabled: state.skip.enabled(),
            skip_interval: state.skip.interval(),
            generation: state.generation,
        }
    }

    /// Last accepted sequence; 0 before the first frame.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    pub fn read(&self) -> Option<Arc<PublishedFrame>> {
        self.reader.latest()
    }

    pub fn reader(&self) -> SlotReader {
        self.reader.clone()
    }

    /// Drop the spare buffer after an allocation failure.
    pub fn reclaim(&self) {
        self.lock().writer.reclaim();
    }

    /// Close capture and release both buffer slots.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.gate = None;
        state.writer.clear();
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide registry of stream transports.
///
/// The `set_*` configuration calls apply to every registered stream; use
/// [`StreamTransport::reconfigure`] for a single stream.
pub struct FrameTransport {
    streams: RwLock<HashMap<StreamId, Arc<StreamTransport>>>,
    next_id: AtomicU64,
    notification_queue: usize,
}

impl FrameTransport {
    pub fn new(notification_queue: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notification_queue,
        }
    }

    pub fn register(&self, config: &StreamConfig) -> Result<Arc<StreamTransport>, ConfigError> {
        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let transport = Arc::new(StreamTransport::new(id, config, self.notification_queue)?);
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, transport.clone());
        info!("Registered stream {}", id);
        Ok(transport)
    }

    pub fn unregister(&self, id: StreamId) -> Option<Arc<StreamTransport>> {
        let removed = self
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(transport) = &removed {
            transport.shutdown();
            info!("Unregistered stream {}", id);
        }
        removed
    }

    pub fn get(&self, id: StreamId) -> Result<Arc<StreamTransport>, TransportError> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(TransportError::UnknownStream(id))
    }

    pub fn subscribe(&self, id: StreamId) -> Result<StreamEvents, TransportError> {
        Ok(self.get(id)?.subscribe())
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn submit(
        &self,
        id: StreamId,
        ticket: CaptureTicket,
        payload: FramePayload<'_>,
    ) -> Result<SubmitOutcome, TransportError> {
        self.get(id)?.submit(ticket, payload)
    }

    /// Latest fully-written frame for `id`, if any has been accepted.
    pub fn read_frame_buffer(&self, id: StreamId) -> Result<Option<Arc<PublishedFrame>>, TransportError> {
        Ok(self.get(id)?.read())
    }

    pub fn set_color_format(&self, use_rgb888: bool) -> Vec<(StreamId, u64)> {
        let format = PixelFormat::from_rgb888(use_rgb888);
        self.apply_all(Reconfigure::ColorFormat(format))
            .unwrap_or_default()
    }

    pub fn set_frame_skip_enabled(&self, enabled: bool) -> Vec<(StreamId, u64)> {
        self.apply_all(Reconfigure::FrameSkipEnabled(enabled))
            .unwrap_or_default()
    }

    pub fn set_frame_skip_interval(&self, interval: u32) -> Result<Vec<(StreamId, u64)>, ConfigError> {
        skip::validate_interval(interval)?;
        self.apply_all(Reconfigure::FrameSkipInterval(interval))
    }

    fn apply_all(&self, change: Reconfigure) -> Result<Vec<(StreamId, u64)>, ConfigError> {
        let streams: Vec<_> = self
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut applied = Vec::with_capacity(streams.len());
        for transport in streams {
            match transport.reconfigure(change) {
                Ok(generation) => applied.push((transport.id(), generation)),
                Err(e) => {
                    warn!("Stream {} rejected {:?}: {}", transport.id(), change, e);
                    return Err(e);
                }
            }
        }
        applied.sort();
        Ok(applied)
    }
}
