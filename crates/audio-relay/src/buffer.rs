//! Bounded frame buffer between the producer loop and the consumer.
//!
//! The rest of the crate uses [`FrameBuffer`] as the hand-off point between
//! stages:
//! - producer thread (router/pipeline) → `consume` (blocking when full)
//! - consumer thread (outside player) drains via `provide*` (non-blocking or
//!   bounded by a timeout)
//!
//! The API is designed to make shutdown deterministic: `lock_buffer()` stops
//! accepting input while still allowing drain, and a terminator is emitted to
//! the consumer once the buffer runs dry after `set_terminate_on_empty()`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use audio_relay_types::AudioFormat;

use crate::frame::{Frame, ReusableFrame};

/// Result of an owning `provide` call.
#[derive(Debug)]
pub enum Provided {
    /// One frame, removed from the buffer.
    Frame(Frame),
    /// Buffer currently empty (non-blocking call only).
    Empty,
    /// The terminator was observed; no frame will ever follow.
    Ended,
    /// The timeout elapsed before a frame arrived (timeout call only).
    TimedOut,
}

/// Result of a `provide_into` call against a caller-owned [`ReusableFrame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvideStatus {
    /// The reusable frame was refilled.
    Filled,
    /// Buffer currently empty (non-blocking call only).
    Empty,
    /// The terminator was observed; no frame will ever follow.
    Ended,
    /// The timeout elapsed before a frame arrived (timeout call only).
    TimedOut,
}

/// Thread-safe bounded FIFO of encoded [`Frame`]s.
///
/// ## Design
/// - **Single producer / single consumer** by contract, but all operations are
///   safe to call from any thread.
/// - **Bounded** by a target buffered duration, converted to a frame count
///   using the expected output chunk duration.
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - All flags (`locked`, `terminate_on_empty`, `clear_on_insert`) live under
///   the same mutex as the queue to avoid races.
pub struct FrameBuffer {
    inner: Mutex<BufferInner>,
    cv: Condvar,
    capacity_frames: usize,
}

struct BufferInner {
    queue: VecDeque<Frame>,
    /// Input permanently refused; buffered content may still drain.
    locked: bool,
    /// Emit a terminator once the queue runs dry.
    terminate_on_empty: bool,
    /// Next insert first discards all queued frames (post-seek discontinuity).
    clear_on_insert: bool,
    /// The terminator has been observed by the reader.
    terminated: bool,
    received_any: bool,
    last_input_timecode: Option<i64>,
}

enum Take {
    Frame(Frame),
    Empty,
    Ended,
    TimedOut,
}

/// Convert a target buffered duration into a frame-count bound.
///
/// Returns at least 1 so the buffer can always make progress even for
/// degenerate formats.
pub fn capacity_for_duration(buffer_duration_ms: u64, format: AudioFormat) -> usize {
    let chunk_ms = format.chunk_duration_ms().max(1);
    (buffer_duration_ms.div_ceil(chunk_ms)).max(1) as usize
}

impl FrameBuffer {
    /// Create a buffer sized to hold `buffer_duration_ms` worth of frames of
    /// the expected output `format`.
    pub fn new(buffer_duration_ms: u64, format: AudioFormat) -> Self {
        Self::with_capacity(capacity_for_duration(buffer_duration_ms, format))
    }

    /// Create a buffer with an explicit frame-count bound.
    pub fn with_capacity(capacity_frames: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::new(),
                locked: false,
                terminate_on_empty: false,
                clear_on_insert: false,
                terminated: false,
                received_any: false,
                last_input_timecode: None,
            }),
            cv: Condvar::new(),
            capacity_frames: capacity_frames.max(1),
        }
    }

    /// Capacity bound in frames.
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Whether any frame has ever been accepted. Used for stuck-track
    /// detection on the consumer side.
    pub fn has_received_frames(&self) -> bool {
        self.inner.lock().unwrap().received_any
    }

    /// Timecode of the most recently accepted frame, for seek bookkeeping.
    pub fn last_input_timecode(&self) -> Option<i64> {
        self.inner.lock().unwrap().last_input_timecode
    }

    /// Insert a frame, blocking while the buffer is full.
    ///
    /// - A locked buffer makes this a silent no-op: the producer is expected
    ///   to observe its own stopping flag and exit on its own.
    /// - When `clear_on_insert` is pending, all queued frames are discarded
    ///   first, so stale pre-seek audio is never delivered.
    /// - After `set_terminate_on_empty()` the track is complete and further
    ///   frames are refused.
    pub fn consume(&self, frame: Frame) {
        let mut g = self.inner.lock().unwrap();
        loop {
            if g.locked || g.terminated || g.terminate_on_empty {
                return;
            }
            if g.clear_on_insert {
                g.queue.clear();
                g.clear_on_insert = false;
                break;
            }
            if g.queue.len() < self.capacity_frames {
                break;
            }
            g = self.cv.wait(g).unwrap();
        }

        g.received_any = true;
        g.last_input_timecode = Some(frame.timecode_ms);
        g.queue.push_back(frame);
        drop(g);
        self.cv.notify_all();
    }

    /// Non-blocking take: one frame, `Empty`, or `Ended`.
    pub fn provide(&self) -> Provided {
        match self.take(None, false) {
            Take::Frame(f) => Provided::Frame(f),
            Take::Empty => Provided::Empty,
            Take::Ended => Provided::Ended,
            Take::TimedOut => Provided::TimedOut,
        }
    }

    /// Blocking take with a bound: one frame, `Ended`, or `TimedOut`.
    ///
    /// A timeout is reported distinctly from track completion so the caller
    /// can detect a stuck track and, for example, substitute silence.
    pub fn provide_timeout(&self, timeout: Duration) -> Provided {
        match self.take(Some(Instant::now() + timeout), true) {
            Take::Frame(f) => Provided::Frame(f),
            Take::Empty => Provided::Empty,
            Take::Ended => Provided::Ended,
            Take::TimedOut => Provided::TimedOut,
        }
    }

    /// Zero-allocation variant of [`provide`](Self::provide): refills a
    /// caller-owned [`ReusableFrame`] in place.
    pub fn provide_into(&self, out: &mut ReusableFrame) -> ProvideStatus {
        self.take_into(out, None)
    }

    /// Zero-allocation variant of [`provide_timeout`](Self::provide_timeout).
    pub fn provide_into_timeout(&self, out: &mut ReusableFrame, timeout: Duration) -> ProvideStatus {
        self.take_into(out, Some(Instant::now() + timeout))
    }

    /// Mark that, once drained, a terminator must be emitted instead of
    /// further blocking, so the consumer can detect end-of-track without a
    /// sentinel timeout.
    pub fn set_terminate_on_empty(&self) {
        let mut g = self.inner.lock().unwrap();
        g.terminate_on_empty = true;
        g.clear_on_insert = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Mark that the next `consume` must first discard all queued frames.
    ///
    /// Used after a seek or track switch. Resets a pending
    /// `terminate_on_empty` since new content is expected. The flag change is
    /// linearized under the buffer lock, and also wakes a producer blocked on
    /// a full buffer so the discontinuity is applied promptly.
    pub fn set_clear_on_insert(&self) {
        let mut g = self.inner.lock().unwrap();
        g.clear_on_insert = true;
        g.terminate_on_empty = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Stop accepting input permanently while still allowing drain of
    /// already-buffered frames. Wakes any blocked `consume`.
    pub fn lock_buffer(&self) {
        let mut g = self.inner.lock().unwrap();
        g.locked = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Block until the terminator has been consumed by the reader.
    ///
    /// Used to guarantee ordering when tearing down a track.
    pub fn wait_for_termination(&self) {
        let mut g = self.inner.lock().unwrap();
        while !g.terminated {
            g = self.cv.wait(g).unwrap();
        }
    }

    fn take(&self, deadline: Option<Instant>, block: bool) -> Take {
        let mut g = self.inner.lock().unwrap();
        loop {
            if let Some(frame) = g.queue.pop_front() {
                drop(g);
                self.cv.notify_all();
                return Take::Frame(frame);
            }
            if g.terminated {
                return Take::Ended;
            }
            if g.terminate_on_empty || g.locked {
                g.terminated = true;
                tracing::debug!("frame buffer terminated");
                drop(g);
                self.cv.notify_all();
                return Take::Ended;
            }
            if !block {
                return Take::Empty;
            }
            let Some(deadline) = deadline else {
                g = self.cv.wait(g).unwrap();
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Take::TimedOut;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
        }
    }

    fn take_into(&self, out: &mut ReusableFrame, deadline: Option<Instant>) -> ProvideStatus {
        match self.take(deadline, deadline.is_some()) {
            Take::Frame(frame) => {
                out.fill_from(&frame);
                ProvideStatus::Filled
            }
            Take::Empty => ProvideStatus::Empty,
            Take::Ended => ProvideStatus::Ended,
            Take::TimedOut => ProvideStatus::TimedOut,
        }
    }
}
