//! Playback configuration.
//!
//! [`PlaybackConfiguration`] is a plain value snapshot; [`SharedConfiguration`]
//! is the process-wide (or per-track) live handle whose volume and filter
//! factory can be changed while a track is playing. The packet router and the
//! pipeline's terminal stage re-read the live handle on each process call, so
//! a configuration change hot-reconfigures in-flight tracks.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use audio_relay_types::{AudioCodec, AudioFormat};

use crate::chain::user::FilterFactory;

/// Maximum accepted volume (percent of unity gain).
pub const MAX_VOLUME: u8 = 150;

/// Quality preset for the resampling stage.
///
/// Maps to sinc interpolation parameters; higher presets trade CPU for
/// stop-band attenuation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleQuality {
    Fast,
    Medium,
    High,
}

/// Tuning and routing parameters for one playback track.
#[derive(Clone)]
pub struct PlaybackConfiguration {
    /// Format every emitted frame must carry.
    pub output_format: AudioFormat,
    /// Volume percent, 0-150 (100 = unity).
    pub volume: u8,
    /// Optional user filter factory inserted ahead of the terminal stage.
    pub filter_factory: Option<Arc<dyn FilterFactory>>,
    /// When set, a filter-factory change is picked up by a running pipeline
    /// without rebuilding the whole chain.
    pub hot_swap_filters: bool,
    /// Resampler quality preset.
    pub resample_quality: ResampleQuality,
    /// Target buffered duration for the frame buffer.
    pub buffer_duration_ms: u64,
}

impl Default for PlaybackConfiguration {
    /// Defaults tuned for Opus voice transmission: 48 kHz stereo, 20 ms
    /// chunks, 400 ms of buffered output.
    fn default() -> Self {
        Self {
            output_format: AudioFormat::new(2, 48_000, 960, AudioCodec::Opus),
            volume: 100,
            filter_factory: None,
            hot_swap_filters: false,
            resample_quality: ResampleQuality::Medium,
            buffer_duration_ms: 400,
        }
    }
}

impl fmt::Debug for PlaybackConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackConfiguration")
            .field("output_format", &self.output_format)
            .field("volume", &self.volume)
            .field("filter_factory", &self.filter_factory.is_some())
            .field("hot_swap_filters", &self.hot_swap_filters)
            .field("resample_quality", &self.resample_quality)
            .field("buffer_duration_ms", &self.buffer_duration_ms)
            .finish()
    }
}

/// Live configuration handle shared between the consumer-facing surface and
/// the producer thread.
///
/// Volume is an atomic so the terminal stage can read it per chunk without
/// locking; the filter factory sits behind a mutex with a generation counter
/// so a running pipeline can detect changes cheaply.
pub struct SharedConfiguration {
    base: Mutex<PlaybackConfiguration>,
    volume: AtomicU8,
    filter_generation: AtomicU64,
}

impl SharedConfiguration {
    pub fn new(configuration: PlaybackConfiguration) -> Arc<Self> {
        let volume = configuration.volume.min(MAX_VOLUME);
        Arc::new(Self {
            base: Mutex::new(configuration),
            volume: AtomicU8::new(volume),
            filter_generation: AtomicU64::new(0),
        })
    }

    /// Current volume percent (0-150).
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Set the volume percent, clamped to [`MAX_VOLUME`].
    ///
    /// Visible to a running pipeline on its next chunk, and to the packet
    /// router's passthrough decision on its next packet.
    pub fn set_volume(&self, value: u8) {
        self.volume.store(value.min(MAX_VOLUME), Ordering::Relaxed);
    }

    /// Replace the user filter factory and bump the filter generation.
    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        {
            let mut base = self.base.lock().unwrap();
            base.filter_factory = factory;
        }
        self.filter_generation.fetch_add(1, Ordering::Release);
    }

    /// Monotonic counter bumped on every filter-factory change.
    pub fn filter_generation(&self) -> u64 {
        self.filter_generation.load(Ordering::Acquire)
    }

    /// Consistent snapshot of the configuration, with the live volume folded
    /// in. One snapshot is taken per process call so a single packet never
    /// sees a torn configuration.
    pub fn snapshot(&self) -> PlaybackConfiguration {
        let mut cfg = self.base.lock().unwrap().clone();
        cfg.volume = self.volume();
        cfg
    }
}

impl fmt::Debug for SharedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConfiguration")
            .field("volume", &self.volume())
            .field("filter_generation", &self.filter_generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_clamped() {
        let cfg = SharedConfiguration::new(PlaybackConfiguration::default());
        cfg.set_volume(200);
        assert_eq!(cfg.volume(), MAX_VOLUME);
    }

    #[test]
    fn snapshot_folds_in_live_volume() {
        let cfg = SharedConfiguration::new(PlaybackConfiguration::default());
        cfg.set_volume(55);
        assert_eq!(cfg.snapshot().volume, 55);
    }

    #[test]
    fn filter_generation_bumps_on_change() {
        let cfg = SharedConfiguration::new(PlaybackConfiguration::default());
        let before = cfg.filter_generation();
        cfg.set_filter_factory(None);
        assert_eq!(cfg.filter_generation(), before + 1);
    }
}
