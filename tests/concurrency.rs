use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framewire::capture::{DecoderEvent, FramePayload, PixelFormat, SyntheticDecoder};
use framewire::mode::{LayoutRect, ScreenSize};
use framewire::pipeline::{FrameSource, SubmitOutcome};
use framewire::{
    Config, FrameTransport, OutboundEvent, PlayRequest, PlayerState, StreamId, StreamTransport,
    VideoStream,
};

const FRAMES: u64 = 2_000;

fn fill(sequence: u64) -> u8 {
    (sequence % 251) as u8
}

/// Alternates between two frame sizes so the writer also exercises
/// reallocation while readers hold frames.
fn size_for(sequence: u64) -> (u32, u32) {
    if sequence % 7 == 0 {
        (64, 36)
    } else {
        (32, 18)
    }
}

#[test]
fn readers_never_observe_torn_frames() {
    let transport =
        Arc::new(StreamTransport::new(StreamId(1), &Config::default().stream, 16).unwrap());
    transport.open_gate();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let reader = transport.reader();
            let done = done.clone();
            thread::spawn(move || {
                let mut last = 0;
                let mut observed = 0u64;
                while !done.load(Ordering::Acquire) {
                    let Some(frame) = reader.latest() else {
                        thread::yield_now();
                        continue;
                    };
                    let descriptor = *frame.descriptor();
                    assert!(descriptor.sequence >= last, "sequence went backwards");
                    assert_eq!(frame.bytes().len(), descriptor.payload_len());
                    assert_eq!(
                        (descriptor.width, descriptor.height),
                        size_for(descriptor.sequence)
                    );
                    let expected = fill(descriptor.sequence);
                    assert!(
                        frame.bytes().iter().all(|&b| b == expected),
                        "frame {} mixes bytes from another frame",
                        descriptor.sequence
                    );
                    last = descriptor.sequence;
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    let mut buffer = Vec::new();
    for sequence in 1..=FRAMES {
        let (width, height) = size_for(sequence);
        buffer.clear();
        buffer.resize(PixelFormat::Rgb888.frame_len(width, height), fill(sequence));
        let ticket = transport.ticket().unwrap();
        let outcome = transport
            .submit(
                ticket,
                FramePayload {
                    data: &buffer,
                    width,
                    height,
                    timestamp_ms: sequence as i64,
                    format: PixelFormat::Rgb888,
                },
            )
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted(d) if d.sequence == sequence));
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(transport.sequence(), FRAMES);
    assert_eq!(transport.stats().accepted, FRAMES);
}

#[test]
fn reconfiguring_while_submitting_keeps_format_consistent() {
    let transport =
        Arc::new(StreamTransport::new(StreamId(1), &Config::default().stream, 16).unwrap());
    transport.open_gate();

    let toggler = {
        let transport = transport.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let format = if i % 2 == 0 {
                    PixelFormat::Rgba
                } else {
                    PixelFormat::Rgb888
                };
                transport
                    .reconfigure(framewire::pipeline::Reconfigure::ColorFormat(format))
                    .unwrap();
                thread::yield_now();
            }
        })
    };

    let rgb = vec![1u8; PixelFormat::Rgb888.frame_len(16, 9)];
    let rgba = vec![2u8; PixelFormat::Rgba.frame_len(16, 9)];
    for _ in 0..FRAMES {
        let ticket = transport.ticket().unwrap();
        let data = match ticket.format {
            PixelFormat::Rgb888 => &rgb,
            PixelFormat::Rgba => &rgba,
        };
        let outcome = transport
            .submit(
                ticket,
                FramePayload {
                    data,
                    width: 16,
                    height: 9,
                    timestamp_ms: 0,
                    format: ticket.format,
                },
            )
            .unwrap();
        match outcome {
            SubmitOutcome::Accepted(descriptor) => {
                assert_eq!(descriptor.format, ticket.format);
                let frame = transport.read().unwrap();
                assert_eq!(frame.bytes().len(), frame.descriptor().payload_len());
            }
            SubmitOutcome::Discarded(_) => {}
            SubmitOutcome::Skipped => panic!("skip is disabled"),
        }
    }
    toggler.join().unwrap();

    let stats = transport.stats();
    assert_eq!(stats.accepted + stats.discarded, FRAMES);
}

fn request() -> PlayRequest {
    PlayRequest {
        layout: LayoutRect {
            width: 320.0,
            height: 180.0,
            ..LayoutRect::default()
        },
        screen: ScreenSize {
            width: 1920,
            height: 1080,
        },
        target_frame_rate: Some(60),
        ..PlayRequest::default()
    }
}

fn playing_stream(registry: Arc<FrameTransport>) -> Arc<VideoStream> {
    let stream = Arc::new(
        VideoStream::create(
            &request(),
            &Config::default(),
            Arc::new(SyntheticDecoder::new(640, 360)),
            registry,
        )
        .unwrap(),
    );
    stream.prepare().unwrap();
    stream.mark_prepared().unwrap();
    stream.play().unwrap();
    stream
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_release_and_play_release_once() {
    let registry = Arc::new(FrameTransport::new(4096));
    let stream = playing_stream(registry.clone());
    let rx = stream.subscribe();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let stream = stream.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    stream.release();
                } else {
                    // Racing a release either succeeds or reports Released.
                    let _ = stream.pause();
                    let _ = stream.play();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(stream.state(), PlayerState::Released);
    assert!(registry.stream_ids().is_empty());
    assert!(stream.read_frame_buffer().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let released = rx
        .drain()
        .into_iter()
        .filter(|event| matches!(event, OutboundEvent::StreamReleased { .. }))
        .count();
    assert_eq!(released, 1);

    // Nothing is delivered after the release.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.drain().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn buffering_events_race_pause_without_spurious_errors() {
    let registry = Arc::new(FrameTransport::new(64));
    let stream = playing_stream(registry);

    let decoder_side = {
        let stream = stream.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                stream.on_decoder_event(DecoderEvent::BufferingStart)?;
                stream.on_decoder_event(DecoderEvent::BufferingEnd)?;
                tokio::task::yield_now().await;
            }
            Ok::<_, framewire::error::StateError>(())
        })
    };
    let host_side = {
        let stream = stream.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                // Pausing while buffering is rejected by the state machine.
                let _ = stream.pause();
                let _ = stream.play();
                tokio::task::yield_now().await;
            }
        })
    };

    decoder_side.await.unwrap().unwrap();
    host_side.await.unwrap();
    stream.release();
}
