use serde::{Deserialize, Serialize};

/// Codec of a buffered or emitted audio chunk.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    /// Opus bitstream packets.
    Opus,
    /// Interleaved signed 16-bit little-endian PCM.
    Pcm16,
    /// Interleaved 32-bit float little-endian PCM.
    PcmF32,
}

/// Immutable description of an audio stream layout.
///
/// Equality of two formats is what drives the passthrough decision in the
/// packet router: a packet whose format matches the configured output format
/// can skip the decode/re-encode path entirely.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per chunk, per channel.
    pub chunk_samples: u32,
    /// Codec carried by chunks of this format.
    pub codec: AudioCodec,
}

impl AudioFormat {
    pub const fn new(channels: u16, sample_rate: u32, chunk_samples: u32, codec: AudioCodec) -> Self {
        Self {
            channels,
            sample_rate,
            chunk_samples,
            codec,
        }
    }

    /// Total interleaved samples in one chunk (per-channel samples × channels).
    pub fn total_samples_per_chunk(&self) -> usize {
        self.chunk_samples as usize * self.channels as usize
    }

    /// Duration of one chunk in milliseconds.
    ///
    /// Returns 0 for a zero sample rate rather than dividing by zero.
    pub fn chunk_duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.chunk_samples as u64).saturating_mul(1000) / self.sample_rate as u64
    }
}

/// Reason why a track's producer loop ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackEndReason {
    /// Natural end of the source stream.
    Finished,
    /// Playback was explicitly stopped by a command.
    Stopped,
    /// Decoder, codec-configuration, or source error interrupted playback.
    Failed,
    /// Cooperative cancellation; distinct from failure so callers do not log
    /// it as an error.
    Cancelled,
}
