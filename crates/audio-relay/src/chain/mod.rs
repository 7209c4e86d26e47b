//! Sample-processing stages between raw PCM and the final encoded frame.
//!
//! A chain is a plain ordered collection of [`ChainStage`]s; the pipeline
//! pushes each chunk through every stage in order and hands the result to the
//! terminal encode stage ([`encode::EncodeSink`]), which is the only stage
//! that writes into the frame buffer.

pub mod encode;
pub mod remix;
pub mod resample;
pub mod user;

use crate::error::Result;

/// One sample transformer in the chain.
///
/// Stages operate on interleaved `f32` sample buffers and may buffer
/// internally (e.g. the resampler's look-ahead); buffered remainder is
/// drained by `flush` at end of stream.
pub trait ChainStage: Send {
    /// Transform `input`, appending produced samples to `output`.
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<()>;

    /// Reset internal state after a seek so no pre-seek audio leaks through.
    fn seek_performed(&mut self) {}

    /// Drain stage-internal look-ahead buffering at end of stream.
    fn flush(&mut self, output: &mut Vec<f32>) -> Result<()> {
        let _ = output;
        Ok(())
    }

    /// Release stage resources.
    fn close(&mut self) {}
}
