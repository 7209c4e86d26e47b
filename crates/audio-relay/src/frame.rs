//! Timestamped encoded audio chunks.
//!
//! A [`Frame`] is one already-encoded chunk of audio output ready for
//! delivery; frames are produced by the pipeline's terminal stage (or the
//! router's passthrough path) and owned by the frame buffer until consumed.

use audio_relay_types::AudioFormat;

/// One timestamped, encoded chunk of audio output.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Start of this chunk on the track timeline, in milliseconds.
    pub timecode_ms: i64,
    /// Volume (0-150, 100 = unity) that was applied when producing the chunk.
    pub volume: u8,
    /// Layout and codec of the payload.
    pub format: AudioFormat,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(timecode_ms: i64, volume: u8, format: AudioFormat, payload: Vec<u8>) -> Self {
        Self {
            timecode_ms,
            volume,
            format,
            payload,
        }
    }

    /// Duration of this frame in milliseconds, derived from its format.
    pub fn duration_ms(&self) -> u64 {
        self.format.chunk_duration_ms()
    }
}

/// Caller-allocated frame shell refilled in place on the hot consumer path.
///
/// The backing buffer is owned by the caller and reused across `provide_into`
/// calls; the frame buffer only ever copies into it and never retains a
/// reference past the call.
#[derive(Debug)]
pub struct ReusableFrame {
    /// Timecode of the most recently filled chunk, in milliseconds.
    pub timecode_ms: i64,
    /// Volume applied to the most recently filled chunk.
    pub volume: u8,
    /// Format of the most recently filled chunk; `None` until first fill.
    pub format: Option<AudioFormat>,
    payload: Vec<u8>,
}

impl ReusableFrame {
    /// Allocate a shell with an initial payload capacity in bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            timecode_ms: 0,
            volume: 100,
            format: None,
            payload: Vec::with_capacity(bytes),
        }
    }

    /// Payload of the most recently filled chunk.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn fill_from(&mut self, frame: &Frame) {
        self.timecode_ms = frame.timecode_ms;
        self.volume = frame.volume;
        self.format = Some(frame.format);
        self.payload.clear();
        self.payload.extend_from_slice(&frame.payload);
    }
}
