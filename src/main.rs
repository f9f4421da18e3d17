//! Framewire demo: synthetic decoder through the frame delivery pipeline

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use framewire::capture::{DecoderEvent, SyntheticDecoder};
use framewire::mode::{LayoutRect, ScreenSize};
use framewire::pipeline::Reconfigure;
use framewire::{Config, FrameTransport, ImageCanvas, PlayRequest, RenderLoop, VideoStream};

const RUN_FOR: Duration = Duration::from_secs(4);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framewire=debug")))
        .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();

    info!("Framewire launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Configuration: {:?}", config);

    let transport = Arc::new(FrameTransport::new(config.transport.notification_queue));
    let decoder = Arc::new(SyntheticDecoder::new(1280, 720));

    let request = PlayRequest {
        layout: LayoutRect {
            width: 640.0,
            height: 360.0,
            ..LayoutRect::default()
        },
        screen: ScreenSize {
            width: 1920,
            height: 1080,
        },
        ..PlayRequest::default()
    };
    let stream = VideoStream::create(&request, &config, decoder.clone(), transport.clone())?;

    // Consumer side
    let render = RenderLoop::new(stream.id(), stream.reader(), ImageCanvas::new());
    let poll = Duration::from_millis(config.render.poll_interval_ms);
    let render_handle = tokio::spawn(render.run(stream.subscribe(), poll));

    stream.prepare()?;
    stream.on_decoder_event(DecoderEvent::Prepared)?;
    stream.play()?;

    tokio::select! {
        _ = tokio::time::sleep(RUN_FOR / 2) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }

    stream.reconfigure(Reconfigure::FrameSkipEnabled(true))?;
    let generation = stream.reconfigure(Reconfigure::FrameSkipInterval(3))?;
    info!("Frame skip 1/3 from generation {}", generation);

    tokio::select! {
        _ = tokio::time::sleep(RUN_FOR / 2) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }

    stream.pause()?;
    let stats = stream.stats();
    stream.release();

    let render = render_handle.await?;
    let rendered = render.stats();
    info!(
        "Decoder rendered {} images; transport submitted {}, accepted {}, skipped {}, discarded {}",
        decoder.frames_rendered(),
        stats.submitted,
        stats.accepted,
        stats.skipped,
        stats.discarded
    );
    info!(
        "Render loop drew {} frames (last #{}, {} stale, {} failed)",
        rendered.rendered, rendered.last_sequence, rendered.stale, rendered.failed
    );
    if let Some(frame) = render.canvas().frame() {
        info!("Canvas holds a {}x{} frame", frame.width(), frame.height());
    }

    info!("Framewire shutting down");
    Ok(())
}
