//! Consumer-side render loop.
//!
//! Sequence numbers are authoritative: notifications may arrive late, twice,
//! or out of order, and a frame is drawn only if its sequence is strictly
//! newer than the last one drawn. The loop always draws the latest published
//! frame, which may be newer than the notification that woke it.

use std::time::{Duration, Instant};

use image::{DynamicImage, RgbImage, RgbaImage};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use super::canvas::Canvas;
use crate::capture::PixelFormat;
use crate::error::CanvasError;
use crate::pipeline::{FrameSource, OutboundEvent, PublishedFrame, StreamEvents};
use crate::utils::FpsMeter;
use crate::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(u64),
    /// Nothing newer than the last rendered sequence
    Stale,
    /// No frame published yet
    Empty,
    /// Frame could not be drawn and was dropped
    Dropped(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: u64,
    pub stale: u64,
    pub failed: u64,
    pub last_sequence: u64,
}

pub struct RenderLoop<S, C> {
    stream_id: StreamId,
    source: S,
    canvas: C,
    stats: RenderStats,
    fps: FpsMeter,
}

impl<S: FrameSource, C: Canvas> RenderLoop<S, C> {
    pub fn new(stream_id: StreamId, source: S, canvas: C) -> Self {
        Self {
            stream_id,
            source,
            canvas,
            stats: RenderStats::default(),
            fps: FpsMeter::new(30),
        }
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn last_rendered(&self) -> u64 {
        self.stats.last_sequence
    }

    /// Handle a frame-ready notification carrying `sequence`.
    pub fn on_frame_ready(&mut self, sequence: u64) -> RenderOutcome {
        if sequence <= self.stats.last_sequence {
            self.stats.stale += 1;
            trace!(
                "Stream {} ignoring stale notification {} (at {})",
                self.stream_id,
                sequence,
                self.stats.last_sequence
            );
            return RenderOutcome::Stale;
        }
        self.render_latest()
    }

    /// Fallback when notifications are unreliable.
    pub fn poll(&mut self) -> RenderOutcome {
        self.render_latest()
    }

    fn render_latest(&mut self) -> RenderOutcome {
        let Some(frame) = self.source.latest() else {
            return RenderOutcome::Empty;
        };
        let sequence = frame.sequence();
        if sequence <= self.stats.last_sequence {
            self.stats.stale += 1;
            return RenderOutcome::Stale;
        }
        // A frame that fails to draw is not retried.
        self.stats.last_sequence = sequence;

        let start = Instant::now();
        match to_image(&frame).and_then(|image| self.canvas.draw(image)) {
            Ok(()) => {
                self.stats.rendered += 1;
                self.fps.tick(start);
                metrics::counter!("frames_rendered_total").increment(1);
                metrics::histogram!("render_time_us").record(start.elapsed().as_micros() as f64);
                metrics::gauge!("render_fps").set(self.fps.fps());
                RenderOutcome::Rendered(sequence)
            }
            Err(e) => {
                self.stats.failed += 1;
                metrics::counter!("frames_render_failed_total").increment(1);
                warn!("Stream {} dropped frame {}: {}", self.stream_id, sequence, e);
                RenderOutcome::Dropped(sequence)
            }
        }
    }

    /// Drive the loop from the stream's events, polling every `poll_interval`
    /// as a fallback. Returns when the stream is released or its events end.
    #[instrument(skip_all, fields(stream = %self.stream_id))]
    pub async fn run(mut self, events: StreamEvents, poll_interval: Duration) -> Self {
        let mut poll = time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(OutboundEvent::FrameReady { sequence, .. }) => {
                        self.on_frame_ready(sequence);
                    }
                    Some(OutboundEvent::StreamReleased { .. }) => {
                        debug!("Stream released, render loop exiting");
                        break;
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = poll.tick() => {
                    self.poll();
                }
            }
        }
        self
    }
}

/// Build a displayable image from a published frame.
pub fn to_image(frame: &PublishedFrame) -> Result<RgbaImage, CanvasError> {
    let descriptor = frame.descriptor();
    let bytes = frame.bytes();
    let malformed = || CanvasError::Malformed {
        width: descriptor.width,
        height: descriptor.height,
        len: bytes.len(),
    };

    if descriptor.width == 0 || descriptor.height == 0 || bytes.len() != descriptor.payload_len() {
        return Err(malformed());
    }

    match descriptor.format {
        PixelFormat::Rgba => {
            RgbaImage::from_raw(descriptor.width, descriptor.height, bytes.to_vec()).ok_or_else(malformed)
        }
        PixelFormat::Rgb888 => RgbImage::from_raw(descriptor.width, descriptor.height, bytes.to_vec())
            .map(|rgb| DynamicImage::ImageRgb8(rgb).into_rgba8())
            .ok_or_else(malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameDescriptor;
    use crate::display::ImageCanvas;
    use crate::pipeline::{double_buffer, FrameSink, SlotWriter};

    fn descriptor(sequence: u64, width: u32, height: u32, format: PixelFormat) -> FrameDescriptor {
        FrameDescriptor {
            sequence,
            width,
            height,
            timestamp_ms: 0,
            format,
            generation: 0,
        }
    }

    fn publish_rgb(writer: &mut SlotWriter, sequence: u64, value: u8) {
        writer
            .publish(&[value; 2 * 2 * 3], descriptor(sequence, 2, 2, PixelFormat::Rgb888))
            .unwrap();
    }

    #[test]
    fn renders_only_newer_sequences() {
        let (mut writer, reader) = double_buffer();
        let mut render = RenderLoop::new(StreamId(1), reader, ImageCanvas::new());

        assert_eq!(render.poll(), RenderOutcome::Empty);
        publish_rgb(&mut writer, 1, 10);
        assert_eq!(render.on_frame_ready(1), RenderOutcome::Rendered(1));
        assert_eq!(render.on_frame_ready(1), RenderOutcome::Stale);
        assert_eq!(render.poll(), RenderOutcome::Stale);

        let pixel = render.canvas().frame().unwrap().get_pixel(0, 0).0;
        assert_eq!(pixel, [10, 10, 10, 255]);
    }

    #[test]
    fn late_notifications_render_latest_frame() {
        let (mut writer, reader) = double_buffer();
        let mut render = RenderLoop::new(StreamId(1), reader, ImageCanvas::new());

        publish_rgb(&mut writer, 1, 1);
        publish_rgb(&mut writer, 2, 2);
        publish_rgb(&mut writer, 3, 3);

        // Notification for 2 arrives first; the newest frame wins.
        assert_eq!(render.on_frame_ready(2), RenderOutcome::Rendered(3));
        assert_eq!(render.on_frame_ready(1), RenderOutcome::Stale);
        assert_eq!(render.on_frame_ready(3), RenderOutcome::Stale);
        assert_eq!(render.stats().rendered, 1);
    }

    #[test]
    fn malformed_frames_are_dropped_not_fatal() {
        let (mut writer, reader) = double_buffer();
        let mut render = RenderLoop::new(StreamId(1), reader, ImageCanvas::new());

        // Descriptor claims 4x4 but only 2x2 worth of bytes were written.
        writer
            .publish(&[0; 12], descriptor(1, 4, 4, PixelFormat::Rgb888))
            .unwrap();
        assert_eq!(render.poll(), RenderOutcome::Dropped(1));
        assert!(render.canvas().frame().is_none());

        publish_rgb(&mut writer, 2, 5);
        assert_eq!(render.poll(), RenderOutcome::Rendered(2));
        assert_eq!(render.stats().failed, 1);
    }

    #[test]
    fn rgba_frames_keep_alpha() {
        let (mut writer, reader) = double_buffer();
        writer
            .publish(&[1, 2, 3, 4].repeat(4), descriptor(1, 2, 2, PixelFormat::Rgba))
            .unwrap();
        let image = to_image(&reader.latest().unwrap()).unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_release() {
        let (mut writer, reader) = double_buffer();
        let (tx, events) = crate::pipeline::events::channel(8);
        let render = RenderLoop::new(StreamId(4), reader, ImageCanvas::new());
        let handle = tokio::spawn(render.run(events, Duration::from_millis(100)));

        publish_rgb(&mut writer, 1, 1);
        tx.emit(OutboundEvent::frame_ready(
            StreamId(4),
            descriptor(1, 2, 2, PixelFormat::Rgb888),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.emit(OutboundEvent::StreamReleased {
            stream_id: StreamId(4),
        });

        let render = handle.await.unwrap();
        assert_eq!(render.last_rendered(), 1);
        assert_eq!(render.stats().rendered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_when_events_end() {
        let (_writer, reader) = double_buffer();
        let (tx, events) = crate::pipeline::events::channel(8);
        let render = RenderLoop::new(StreamId(4), reader, ImageCanvas::new());
        let handle = tokio::spawn(render.run(events, Duration::from_millis(100)));

        drop(tx);
        let render = handle.await.unwrap();
        assert_eq!(render.stats().rendered, 0);
    }
}
