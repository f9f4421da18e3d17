//! One video pipeline instance: decoder -> capture -> transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::capture::{DecoderEvent, FrameSampler, RenderSurface, VideoDecoder};
use crate::error::{ConfigError, PipelineError, StateError};
use crate::mode::{ModeSelector, RenderMode};
use crate::pipeline::{
    FrameTransport, OutboundEvent, PublishedFrame, Reconfigure, SlotReader, StreamEvents,
    StreamTransport, TransportStatsSnapshot,
};
use crate::player::{CaptureChange, PlayerState, PlayerStateMachine, Transition};
use crate::{Config, PlayRequest, StreamConfig, StreamId};

pub struct VideoStream {
    id: StreamId,
    mode: RenderMode,
    config: StreamConfig,
    machine: Mutex<PlayerStateMachine>,
    transport: Arc<StreamTransport>,
    registry: Arc<FrameTransport>,
    visible: Arc<AtomicBool>,
    hint: Arc<Notify>,
    capture: Mutex<Option<JoinHandle<()>>>,
}

impl VideoStream {
    /// Create a stream for `request`.
    ///
    /// Must be called from within a tokio runtime: the capture task is
    /// spawned here and parks until the player starts playing.
    #[instrument(skip_all)]
    pub fn create(
        request: &PlayRequest,
        defaults: &Config,
        decoder: Arc<dyn VideoDecoder>,
        registry: Arc<FrameTransport>,
    ) -> Result<Self, PipelineError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let config = request.stream_config(&defaults.stream)?;
        let mode = ModeSelector::new(defaults.mode.canvas_area_threshold)?
            .select(&request.layout, request.screen);

        let surface = RenderSurface {
            width: request.layout.width.round().max(1.0) as u32,
            height: request.layout.height.round().max(1.0) as u32,
        };

        let transport = registry.register(&config)?;
        let id = transport.id();
        if let Err(e) = decoder.configure(surface) {
            registry.unregister(id);
            return Err(e.into());
        }

        let machine = PlayerStateMachine::new();
        let visible = Arc::new(AtomicBool::new(request.layout.visible));
        let hint = Arc::new(Notify::new());

        let capture = match mode {
            RenderMode::Canvas => {
                let sampler = FrameSampler::new(
                    decoder,
                    transport.clone(),
                    config.target_frame_rate,
                    config.max_dimension,
                    visible.clone(),
                    hint.clone(),
                );
                Some(runtime.spawn(sampler.run(machine.subscribe())))
            }
            RenderMode::Overlay => None,
        };

        info!(
            "Stream {} created: {:?}, {} fps, max {}px, {:?}",
            id, mode, config.target_frame_rate, config.max_dimension, config.color_format
        );

        Ok(Self {
            id,
            mode,
            config,
            machine: Mutex::new(machine),
            transport,
            registry,
            visible,
            hint,
            capture: Mutex::new(capture),
        })
    }

    /// Parse a host payload and create the stream. Malformed payloads fail
    /// before anything is registered.
    pub fn create_from_json(
        payload: &str,
        defaults: &Config,
        decoder: Arc<dyn VideoDecoder>,
        registry: Arc<FrameTransport>,
    ) -> Result<Self, PipelineError> {
        let request = PlayRequest::from_json(payload)?;
        Self::create(&request, defaults, decoder, registry)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> PlayerState {
        self.lock_machine().state()
    }

    fn lock_machine(&self) -> MutexGuard<'_, PlayerStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: PlayerState) -> Result<Transition, StateError> {
        let mut machine = self.lock_machine();
        self.transition_locked(&mut machine, to)
    }

    fn transition_locked(
        &self,
        machine: &mut PlayerStateMachine,
        to: PlayerState,
    ) -> Result<Transition, StateError> {
        let planned = machine.check(to)?;

        // Open before the sampler can observe `Playing`, close before returning.
        if planned.capture() == CaptureChange::Start && self.mode == RenderMode::Canvas {
            self.transport.open_gate();
        }
        let transition = machine.transition(to)?;
        if transition.capture() == CaptureChange::Stop {
            self.transport.close_gate();
        }

        self.transport.emit(OutboundEvent::StateChanged {
            stream_id: self.id,
            state: to,
        });
        Ok(transition)
    }

    /// Transition to `to` only if the player is currently in `from`.
    fn transition_from(&self, from: PlayerState, to: PlayerState) -> Result<(), StateError> {
        let mut machine = self.lock_machine();
        if machine.state() == from {
            self.transition_locked(&mut machine, to)?;
        }
        Ok(())
    }

    pub fn prepare(&self) -> Result<(), StateError> {
        self.transition(PlayerState::Preparing).map(drop)
    }

    pub fn mark_prepared(&self) -> Result<(), StateError> {
        self.transition(PlayerState::Prepared).map(drop)
    }

    #[instrument(skip(self), fields(stream = %self.id))]
    pub fn play(&self) -> Result<(), StateError> {
        self.transition(PlayerState::Playing).map(drop)
    }

    #[instrument(skip(self), fields(stream = %self.id))]
    pub fn pause(&self) -> Result<(), StateError> {
        self.transition(PlayerState::Paused).map(drop)
    }

    /// Stop playback. The stream can be prepared again afterwards.
    pub fn stop(&self) -> Result<(), StateError> {
        self.transition(PlayerState::Completed).map(drop)
    }

    /// Decoder-fatal error: capture halts and nothing is retried.
    pub fn fail(&self, code: i32, message: impl Into<String>) -> Result<(), StateError> {
        let message = message.into();
        error!("Stream {} decoder error {}: {}", self.id, code, message);
        self.transition(PlayerState::Error)?;
        self.transport.emit(OutboundEvent::Error {
            stream_id: self.id,
            code,
            message,
        });
        Ok(())
    }

    /// Playback-state callback from the decoder.
    pub fn on_decoder_event(&self, event: DecoderEvent) -> Result<(), StateError> {
        match event {
            DecoderEvent::Prepared => self.mark_prepared(),
            DecoderEvent::BufferingStart => {
                self.transition_from(PlayerState::Playing, PlayerState::Buffering)
            }
            DecoderEvent::BufferingEnd => {
                self.transition_from(PlayerState::Buffering, PlayerState::Playing)
            }
            DecoderEvent::Completed => self.transition(PlayerState::Completed).map(drop),
            DecoderEvent::VideoSizeChanged { width, height } => {
                if self.state().is_terminal() {
                    return Err(StateError::Released);
                }
                self.transport.emit(OutboundEvent::VideoSizeChanged {
                    stream_id: self.id,
                    width,
                    height,
                });
                Ok(())
            }
            DecoderEvent::Error { code, message } => self.fail(code, message),
        }
    }

    /// Tear everything down. Safe to call repeatedly, from any state, and
    /// concurrently with other lifecycle calls.
    #[instrument(skip(self), fields(stream = %self.id))]
    pub fn release(&self) {
        let mut machine = self.lock_machine();
        let Some(transition) = machine.release() else {
            return;
        };

        if let Some(handle) = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.transport.shutdown();
        self.registry.unregister(self.id);
        drop(machine);

        self.transport.emit(OutboundEvent::StateChanged {
            stream_id: self.id,
            state: PlayerState::Released,
        });
        self.transport
            .emit(OutboundEvent::StreamReleased { stream_id: self.id });
        info!("Stream {} released from {:?}", self.id, transition.from);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    /// Optional "new frame rendered" push from the decoder.
    pub fn hint_frame_available(&self) {
        self.hint.notify_one();
    }

    pub fn reconfigure(&self, change: Reconfigure) -> Result<u64, ConfigError> {
        if self.state().is_terminal() {
            warn!("Stream {} reconfigured after release", self.id);
        }
        self.transport.reconfigure(change)
    }

    pub fn read_frame_buffer(&self) -> Option<Arc<PublishedFrame>> {
        self.transport.read()
    }

    /// This stream's outbound events. Frame-ready notifications may be
    /// dropped when the consumer lags; lifecycle events never are.
    pub fn subscribe(&self) -> StreamEvents {
        self.transport.subscribe()
    }

    /// Consumer-side handle for a render loop.
    pub fn reader(&self) -> SlotReader {
        self.transport.reader()
    }

    pub fn transport(&self) -> &Arc<StreamTransport> {
        &self.transport
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.transport.stats()
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.release();
    }
}
