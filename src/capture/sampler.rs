//! Fixed-period frame capture.
//!
//! Decoder "new frame" callbacks are unreliable across backends, so the timer
//! is the source of truth: while the player is `Playing` the sampler pulls the
//! decoder's latest image once per period. A push hint can only pull a capture
//! forward when a full period has already elapsed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::convert::FrameConverter;
use super::decoder::VideoDecoder;
use crate::error::{CaptureError, PipelineError, TransportError};
use crate::pipeline::{StreamTransport, SubmitOutcome};
use crate::player::PlayerState;

/// Result of a single capture attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Frame reached the transport (which may still skip or discard it)
    Submitted(SubmitOutcome),
    /// Capture window closed
    Stopped,
    Hidden,
    NoImage,
    /// Frame dropped after a conversion or transport fault
    Dropped,
}

pub fn capture_period(target_frame_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / target_frame_rate.max(1) as f64)
}

pub struct FrameSampler {
    decoder: Arc<dyn VideoDecoder>,
    transport: Arc<StreamTransport>,
    converter: FrameConverter,
    period: Duration,
    visible: Arc<AtomicBool>,
    hint: Arc<Notify>,
}

impl FrameSampler {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        transport: Arc<StreamTransport>,
        target_frame_rate: u32,
        max_dimension: u32,
        visible: Arc<AtomicBool>,
        hint: Arc<Notify>,
    ) -> Self {
        Self {
            decoder,
            transport,
            converter: FrameConverter::new(max_dimension),
            period: capture_period(target_frame_rate),
            visible,
            hint,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One capture attempt. Never fails: every fault drops the frame.
    pub fn capture_once(&mut self) -> CaptureOutcome {
        if !self.visible.load(Ordering::Acquire) {
            return CaptureOutcome::Hidden;
        }
        let Some(ticket) = self.transport.ticket() else {
            return CaptureOutcome::Stopped;
        };
        let Some(image) = self.decoder.current_image() else {
            trace!("Stream {} has no rendered image yet", self.transport.id());
            return CaptureOutcome::NoImage;
        };
        metrics::counter!("frames_captured_total").increment(1);

        let result: Result<SubmitOutcome, PipelineError> =
            match self.converter.convert(&image, ticket.format) {
                Ok(payload) => self.transport.submit(ticket, payload).map_err(Into::into),
                Err(e) => Err(e.into()),
            };

        match result {
            Ok(outcome) => CaptureOutcome::Submitted(outcome),
            Err(PipelineError::Capture(CaptureError::InvalidSource { width, height, .. })) => {
                trace!("Skipping unusable {}x{} source image", width, height);
                CaptureOutcome::Dropped
            }
            Err(
                PipelineError::Capture(CaptureError::OutOfMemory { bytes })
                | PipelineError::Transport(TransportError::OutOfMemory { bytes }),
            ) => {
                warn!(
                    "Stream {} out of memory ({} bytes), reclaiming buffers",
                    self.transport.id(),
                    bytes
                );
                self.converter.reclaim();
                self.transport.reclaim();
                CaptureOutcome::Dropped
            }
            Err(e) => {
                warn!("Stream {} dropped frame: {}", self.transport.id(), e);
                CaptureOutcome::Dropped
            }
        }
    }

    /// Capture loop bound to the player state. Returns once the player is
    /// released or the state channel closes.
    pub async fn run(mut self, mut state: watch::Receiver<PlayerState>) {
        let id = self.transport.id();
        loop {
            let current = match state
                .wait_for(|s| *s == PlayerState::Playing || s.is_terminal())
                .await
            {
                Ok(s) => *s,
                Err(_) => break,
            };
            if current.is_terminal() {
                break;
            }

            info!("Stream {} capture running every {:?}", id, self.period);
            let mut ticker = time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_capture: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.hint.notified() => {
                        if last_capture.is_some_and(|t| t.elapsed() < self.period) {
                            continue;
                        }
                        ticker.reset();
                    }
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if *state.borrow_and_update() != PlayerState::Playing {
                            break;
                        }
                        continue;
                    }
                }

                if *state.borrow() != PlayerState::Playing {
                    break;
                }
                let at = Instant::now();
                let outcome = self.capture_once();
                // Ticks that never reached the decoder don't count against the rate.
                if !matches!(outcome, CaptureOutcome::Hidden | CaptureOutcome::Stopped) {
                    last_capture = Some(at);
                }
                trace!("Stream {} capture: {:?}", id, outcome);
            }
            debug!("Stream {} capture parked", id);
        }
        debug!("Stream {} capture task finished", id);
    }
}
