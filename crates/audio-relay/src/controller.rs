//! Playback controller: owns the producer thread for one track.
//!
//! The controller spawns a producer thread that pulls packets from a
//! [`TrackSource`] into the packet router, and exposes the consumer-facing
//! surface: frame draining, volume, seek and stop requests, and the track's
//! end reason. Seek and stop are cooperative; the source observes them
//! through the `interrupted` callback and returns control to the track loop,
//! which applies the request and resumes.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use audio_relay_types::TrackEndReason;
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::adapter::{AdapterFactory, EncoderFactory};
use crate::buffer::{FrameBuffer, Provided, ProvideStatus};
use crate::chain::user::FilterFactory;
use crate::config::{PlaybackConfiguration, SharedConfiguration};
use crate::error::EngineError;
use crate::frame::ReusableFrame;
use crate::pipeline::PipelineContext;
use crate::router::OpusPacketRouter;

/// Why a `provide_frames` call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceStatus {
    /// The source has no more packets; the track ended naturally.
    Finished,
    /// The source yielded because `interrupted` reported a pending request.
    Interrupted,
}

/// A packet source for one track (demuxed network stream, file reader, ...).
///
/// Runs entirely on the producer thread. `provide_frames` should push packets
/// into the router until the source ends or `interrupted` returns `true`;
/// checking it once per packet keeps stop and seek latency at one packet.
pub trait TrackSource: Send {
    fn provide_frames(
        &mut self,
        router: &mut OpusPacketRouter,
        interrupted: &mut dyn FnMut() -> bool,
    ) -> anyhow::Result<SourceStatus>;

    /// Reposition the source as close to `timecode_ms` as it can; returns the
    /// position actually achieved (a container may only seek to packet or
    /// keyframe boundaries).
    fn seek(&mut self, timecode_ms: i64) -> anyhow::Result<i64>;
}

/// Sentinel for "no seek pending" in [`TrackShared::pending_seek`].
const NO_SEEK: i64 = -1;

struct TrackShared {
    stop: AtomicBool,
    /// Requested seek position in ms, or [`NO_SEEK`]. Writers overwrite; only
    /// the newest request matters.
    pending_seek: AtomicI64,
    end_reason: Mutex<Option<TrackEndReason>>,
}

impl TrackShared {
    fn interrupted(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.pending_seek.load(Ordering::Acquire) != NO_SEEK
    }
}

/// Handle to one playing track.
///
/// Dropping the controller does not stop the track; call [`stop`](Self::stop)
/// and [`join`](Self::join) for an orderly shutdown.
pub struct PlaybackController {
    config: Arc<SharedConfiguration>,
    buffer: Arc<FrameBuffer>,
    shared: Arc<TrackShared>,
    failures: Receiver<EngineError>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    /// Start playback of `source`, spawning the producer thread.
    pub fn start(
        configuration: PlaybackConfiguration,
        source: Box<dyn TrackSource>,
        adapters: Arc<dyn AdapterFactory>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        let buffer = Arc::new(FrameBuffer::new(
            configuration.buffer_duration_ms,
            configuration.output_format,
        ));
        let config = SharedConfiguration::new(configuration);
        let shared = Arc::new(TrackShared {
            stop: AtomicBool::new(false),
            pending_seek: AtomicI64::new(NO_SEEK),
            end_reason: Mutex::new(None),
        });
        // One slot is enough: only the first failure of a track is reported.
        let (failure_tx, failure_rx) = bounded(1);

        let ctx = PipelineContext {
            config: config.clone(),
            buffer: buffer.clone(),
            encoders,
        };
        let router = OpusPacketRouter::new(ctx, adapters);

        let thread_shared = shared.clone();
        let thread_buffer = buffer.clone();
        let handle = thread::spawn(move || {
            run_track(source, router, thread_shared, thread_buffer, failure_tx);
        });

        Self {
            config,
            buffer,
            shared,
            failures: failure_rx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Live configuration handle (volume, filters) for this track.
    pub fn configuration(&self) -> &Arc<SharedConfiguration> {
        &self.config
    }

    /// The frame buffer this track fills.
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Take one frame if available, without blocking.
    pub fn provide(&self) -> Provided {
        self.buffer.provide()
    }

    /// Take one frame, waiting up to `timeout` for one to arrive.
    pub fn provide_timeout(&self, timeout: Duration) -> Provided {
        self.buffer.provide_timeout(timeout)
    }

    /// Refill `frame` from the buffer if a frame is available.
    pub fn provide_into(&self, frame: &mut ReusableFrame) -> ProvideStatus {
        self.buffer.provide_into(frame)
    }

    /// Refill `frame`, waiting up to `timeout` for a frame to arrive.
    pub fn provide_into_timeout(&self, frame: &mut ReusableFrame, timeout: Duration) -> ProvideStatus {
        self.buffer.provide_into_timeout(frame, timeout)
    }

    /// Change the playback volume, effective on the next output chunk.
    pub fn set_volume(&self, volume: u8) {
        self.config.set_volume(volume);
    }

    /// Replace the user filter factory.
    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        self.config.set_filter_factory(factory);
    }

    /// Request an asynchronous seek. Buffered pre-seek frames are discarded
    /// when the first post-seek frame arrives, so already-handed-out frames
    /// are unaffected. A newer request supersedes an unserviced older one.
    pub fn request_seek(&self, timecode_ms: i64) {
        self.shared
            .pending_seek
            .store(timecode_ms.max(0), Ordering::Release);
        // Unblocks a producer waiting on a full buffer so the request is
        // serviced promptly.
        self.buffer.set_clear_on_insert();
    }

    /// Request the track to stop. Returns immediately; the consumer observes
    /// the terminator once buffered frames drain.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.buffer.lock_buffer();
        self.buffer.set_terminate_on_empty();
    }

    /// Wait for the producer thread to finish. Idempotent.
    pub fn join(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("producer thread panicked");
            }
        }
    }

    /// Why the track ended; `None` while it is still playing.
    pub fn end_reason(&self) -> Option<TrackEndReason> {
        *self.shared.end_reason.lock().unwrap()
    }

    /// Take the track's failure, if it failed. At most one per track.
    pub fn take_failure(&self) -> Option<EngineError> {
        self.failures.try_recv().ok()
    }
}

fn run_track(
    mut source: Box<dyn TrackSource>,
    mut router: OpusPacketRouter,
    shared: Arc<TrackShared>,
    buffer: Arc<FrameBuffer>,
    failure_tx: Sender<EngineError>,
) {
    let reason = track_loop(&mut source, &mut router, &shared, &buffer, &failure_tx);

    match reason {
        TrackEndReason::Finished => {
            // Natural end: let buffered frames drain before terminating.
            buffer.set_terminate_on_empty();
        }
        _ => {
            buffer.lock_buffer();
            buffer.set_terminate_on_empty();
        }
    }
    *shared.end_reason.lock().unwrap() = Some(reason);
    router.close();
    tracing::info!(?reason, "track ended");
}

fn track_loop(
    source: &mut Box<dyn TrackSource>,
    router: &mut OpusPacketRouter,
    shared: &Arc<TrackShared>,
    buffer: &Arc<FrameBuffer>,
    failure_tx: &Sender<EngineError>,
) -> TrackEndReason {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return TrackEndReason::Stopped;
        }

        let requested = shared.pending_seek.swap(NO_SEEK, Ordering::AcqRel);
        if requested != NO_SEEK {
            // Discard buffered pre-seek audio the moment post-seek audio
            // arrives; set again here in case a newer request raced the swap.
            buffer.set_clear_on_insert();
            match source.seek(requested) {
                Ok(achieved) => {
                    tracing::debug!(requested, achieved, "seek performed");
                    router.seek_performed(requested, achieved);
                }
                Err(error) => {
                    report_failure(failure_tx, EngineError::Source(error));
                    return TrackEndReason::Failed;
                }
            }
        }

        let mut interrupted = || shared.interrupted();

        match source.provide_frames(router, &mut interrupted) {
            Ok(SourceStatus::Finished) => {
                if let Err(error) = router.flush() {
                    report_failure(failure_tx, error);
                    return TrackEndReason::Failed;
                }
                return TrackEndReason::Finished;
            }
            Ok(SourceStatus::Interrupted) => continue,
            Err(error) => {
                return match error.downcast::<EngineError>() {
                    Ok(EngineError::Cancelled) => TrackEndReason::Cancelled,
                    Ok(engine_error) => {
                        report_failure(failure_tx, engine_error);
                        TrackEndReason::Failed
                    }
                    Err(other) => {
                        report_failure(failure_tx, EngineError::Source(other));
                        TrackEndReason::Failed
                    }
                };
            }
        }
    }
}

fn report_failure(failure_tx: &Sender<EngineError>, error: EngineError) {
    tracing::error!(%error, "track failed");
    // A full channel means an earlier failure was already reported.
    let _ = failure_tx.try_send(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{MockAdapterFactory, MockEncoderFactory};
    use audio_relay_types::{AudioCodec, AudioFormat};

    // CELT-only stereo 20 ms packet, code 0.
    const TOC: u8 = 0xFC;
    const PACKET_MS: i64 = 20;

    fn opus_output() -> AudioFormat {
        AudioFormat::new(2, 48_000, 960, AudioCodec::Opus)
    }

    fn start(source: Box<dyn TrackSource>, configuration: PlaybackConfiguration) -> PlaybackController {
        PlaybackController::start(
            configuration,
            source,
            Arc::new(MockAdapterFactory::new()),
            Arc::new(MockEncoderFactory),
        )
    }

    /// Emits a fixed number of packets, checking for interruption per packet.
    struct FinitePackets {
        remaining: usize,
    }

    impl TrackSource for FinitePackets {
        fn provide_frames(
            &mut self,
            router: &mut OpusPacketRouter,
            interrupted: &mut dyn FnMut() -> bool,
        ) -> anyhow::Result<SourceStatus> {
            while self.remaining > 0 {
                if interrupted() {
                    return Ok(SourceStatus::Interrupted);
                }
                router.process(&[TOC, 1, 2, 3])?;
                self.remaining -= 1;
            }
            Ok(SourceStatus::Finished)
        }

        fn seek(&mut self, timecode_ms: i64) -> anyhow::Result<i64> {
            Ok(timecode_ms - timecode_ms % PACKET_MS)
        }
    }

    /// Never finishes on its own; only interruption stops it.
    struct EndlessPackets;

    impl TrackSource for EndlessPackets {
        fn provide_frames(
            &mut self,
            router: &mut OpusPacketRouter,
            interrupted: &mut dyn FnMut() -> bool,
        ) -> anyhow::Result<SourceStatus> {
            loop {
                if interrupted() {
                    return Ok(SourceStatus::Interrupted);
                }
                router.process(&[TOC, 1, 2, 3])?;
            }
        }

        fn seek(&mut self, timecode_ms: i64) -> anyhow::Result<i64> {
            Ok(timecode_ms - timecode_ms % PACKET_MS)
        }
    }

    struct FailingSource;

    impl TrackSource for FailingSource {
        fn provide_frames(
            &mut self,
            _router: &mut OpusPacketRouter,
            _interrupted: &mut dyn FnMut() -> bool,
        ) -> anyhow::Result<SourceStatus> {
            Err(anyhow::anyhow!("connection reset"))
        }

        fn seek(&mut self, _timecode_ms: i64) -> anyhow::Result<i64> {
            Err(anyhow::anyhow!("not seekable"))
        }
    }

    struct CancellingSource;

    impl TrackSource for CancellingSource {
        fn provide_frames(
            &mut self,
            _router: &mut OpusPacketRouter,
            _interrupted: &mut dyn FnMut() -> bool,
        ) -> anyhow::Result<SourceStatus> {
            Err(EngineError::Cancelled.into())
        }

        fn seek(&mut self, timecode_ms: i64) -> anyhow::Result<i64> {
            Ok(timecode_ms)
        }
    }

    fn drain_until_ended(controller: &PlaybackController) -> Vec<i64> {
        let mut timecodes = Vec::new();
        loop {
            match controller.provide_timeout(Duration::from_secs(5)) {
                Provided::Frame(f) => timecodes.push(f.timecode_ms),
                Provided::Ended => return timecodes,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn finished_track_drains_fully_then_terminates() {
        let controller = start(
            Box::new(FinitePackets { remaining: 50 }),
            PlaybackConfiguration {
                output_format: opus_output(),
                ..PlaybackConfiguration::default()
            },
        );

        let timecodes = drain_until_ended(&controller);
        controller.join();

        assert_eq!(timecodes.len(), 50);
        assert_eq!(timecodes.first(), Some(&0));
        assert_eq!(timecodes.last(), Some(&(49 * PACKET_MS)));
        assert_eq!(controller.end_reason(), Some(TrackEndReason::Finished));
        assert!(controller.take_failure().is_none());
    }

    #[test]
    fn stop_interrupts_a_producer_blocked_on_a_full_buffer() {
        let controller = start(
            Box::new(EndlessPackets),
            PlaybackConfiguration {
                output_format: opus_output(),
                buffer_duration_ms: 100,
                ..PlaybackConfiguration::default()
            },
        );

        // Let the producer fill the buffer and block.
        while !controller.buffer().has_received_frames() {
            thread::yield_now();
        }

        controller.stop();
        controller.join();
        assert_eq!(controller.end_reason(), Some(TrackEndReason::Stopped));

        // Drains whatever was buffered, then terminates.
        let mut saw_ended = false;
        loop {
            match controller.provide_timeout(Duration::from_secs(5)) {
                Provided::Frame(_) => {}
                Provided::Ended => {
                    saw_ended = true;
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_ended);
    }

    #[test]
    fn seek_discards_buffered_frames_and_resumes_at_achieved_position() {
        let controller = start(
            Box::new(EndlessPackets),
            PlaybackConfiguration {
                output_format: opus_output(),
                buffer_duration_ms: 100,
                ..PlaybackConfiguration::default()
            },
        );

        while !controller.buffer().has_received_frames() {
            thread::yield_now();
        }

        // 12:34.567 snaps to the previous packet boundary.
        controller.request_seek(754_567);
        let expected = 754_567 - 754_567 % PACKET_MS;

        // The first frame at or past the achieved position marks the seek;
        // everything before it is pre-seek residue being discarded.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(std::time::Instant::now() < deadline, "seek never observed");
            match controller.provide_timeout(Duration::from_millis(100)) {
                Provided::Frame(f) if f.timecode_ms >= expected => {
                    assert_eq!(f.timecode_ms, expected);
                    break;
                }
                Provided::Frame(_) | Provided::TimedOut => {}
                other => panic!("unexpected {other:?}"),
            }
        }

        controller.stop();
        controller.join();
    }

    #[test]
    fn source_failure_is_reported_once() {
        let controller = start(
            Box::new(FailingSource),
            PlaybackConfiguration {
                output_format: opus_output(),
                ..PlaybackConfiguration::default()
            },
        );
        controller.join();

        assert_eq!(controller.end_reason(), Some(TrackEndReason::Failed));
        let failure = controller.take_failure().expect("failure reported");
        assert!(failure.to_string().contains("connection reset"));
        assert!(controller.take_failure().is_none());

        // Consumer still observes an orderly terminator.
        assert!(matches!(
            controller.provide_timeout(Duration::from_secs(5)),
            Provided::Ended
        ));
    }

    #[test]
    fn cancellation_ends_the_track_without_a_failure() {
        let controller = start(
            Box::new(CancellingSource),
            PlaybackConfiguration {
                output_format: opus_output(),
                ..PlaybackConfiguration::default()
            },
        );
        controller.join();

        assert_eq!(controller.end_reason(), Some(TrackEndReason::Cancelled));
        assert!(controller.take_failure().is_none());
    }

    #[test]
    fn volume_change_reaches_the_running_track() {
        let controller = start(
            Box::new(EndlessPackets),
            PlaybackConfiguration {
                output_format: opus_output(),
                buffer_duration_ms: 100,
                ..PlaybackConfiguration::default()
            },
        );

        // Unity volume: passthrough frames report volume 100.
        match controller.provide_timeout(Duration::from_secs(5)) {
            Provided::Frame(f) => assert_eq!(f.volume, 100),
            other => panic!("unexpected {other:?}"),
        }

        controller.set_volume(60);
        // The route flips to decoding within a packet; drain until a frame
        // carries the new volume.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(std::time::Instant::now() < deadline, "volume never applied");
            match controller.provide_timeout(Duration::from_millis(100)) {
                Provided::Frame(f) if f.volume == 60 => break,
                Provided::Frame(_) | Provided::TimedOut => {}
                other => panic!("unexpected {other:?}"),
            }
        }

        controller.stop();
        controller.join();
    }
}
