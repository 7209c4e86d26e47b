//! User-pluggable filter stage.

use std::fmt;

use audio_relay_types::AudioFormat;

use super::ChainStage;
use crate::error::Result;

/// A user-supplied in-place sample transformer (equalizer, gain ramp, ...).
pub trait AudioFilter: Send {
    /// Transform interleaved `f32` samples in place.
    fn process(&mut self, samples: &mut [f32]) -> Result<()>;

    /// Reset internal history after a seek.
    fn seek_performed(&mut self) {}

    /// Release filter resources.
    fn close(&mut self) {}
}

/// Builds the filter set for a track; invoked whenever a pipeline (re)builds
/// its user stage.
pub trait FilterFactory: Send + Sync {
    fn create(&self, format: AudioFormat) -> Vec<Box<dyn AudioFilter>>;
}

impl fmt::Debug for dyn FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterFactory")
    }
}

/// Chain stage applying user filters in order.
///
/// Built from the configured [`FilterFactory`]; when hot-swap is enabled the
/// pipeline tears this stage down and rebuilds it on a factory change without
/// touching the rest of the chain.
pub struct UserFilterStage {
    filters: Vec<Box<dyn AudioFilter>>,
}

impl UserFilterStage {
    pub fn new(factory: &dyn FilterFactory, format: AudioFormat) -> Self {
        Self {
            filters: factory.create(format),
        }
    }
}

impl ChainStage for UserFilterStage {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let start = output.len();
        output.extend_from_slice(input);
        for filter in &mut self.filters {
            filter.process(&mut output[start..])?;
        }
        Ok(())
    }

    fn seek_performed(&mut self) {
        for filter in &mut self.filters {
            filter.seek_performed();
        }
    }

    fn close(&mut self) {
        for filter in &mut self.filters {
            filter.close();
        }
    }
}
