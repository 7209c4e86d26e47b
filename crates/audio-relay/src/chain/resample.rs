//! Rate-conversion stage.
//!
//! Uses Rubato's streaming sinc resampler to convert interleaved `f32` audio
//! from the input rate to the configured output rate. Input is accumulated
//! until a full resampler chunk is available; the tail is drained with a
//! partial-length call on `flush`.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::ChainStage;
use crate::config::ResampleQuality;
use crate::error::{EngineError, Result};

/// Input chunk size in frames for the steady-state resampling loop.
const CHUNK_IN_FRAMES: usize = 1024;

pub struct ResampleStage {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    /// Interleaved input awaiting a full chunk.
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
}

impl ResampleStage {
    pub fn new(
        channels: u16,
        src_rate: u32,
        dst_rate: u32,
        quality: ResampleQuality,
    ) -> Result<Self> {
        let channels = (channels as usize).max(1);
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let (sinc_len, oversampling_factor, interpolation) = match quality {
            ResampleQuality::Fast => (64, 128, SincInterpolationType::Linear),
            ResampleQuality::Medium => (128, 256, SincInterpolationType::Cubic),
            ResampleQuality::High => (256, 512, SincInterpolationType::Cubic),
        };
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation,
            oversampling_factor,
            window,
        };

        let resampler: Box<dyn Resampler<f32>> = Box::new(
            Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                CHUNK_IN_FRAMES,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| EngineError::Processing(format!("resampler init: {e}")))?,
        );

        // Output headroom: enough for the rate ratio plus resampler slack.
        let out_chunks = (f_ratio.ceil() as usize).max(1) + 2;
        let out_interleaved = vec![0.0f32; channels * CHUNK_IN_FRAMES * out_chunks];

        tracing::debug!(src_rate, dst_rate, ?quality, "resample stage created");

        Ok(Self {
            resampler,
            channels,
            pending: Vec::new(),
            out_interleaved,
        })
    }

    /// Run one resampler call over the first `frames` pending frames and
    /// append its output. `partial` marks the flush-tail call.
    fn run_chunk(&mut self, frames: usize, partial: bool, output: &mut Vec<f32>) -> Result<()> {
        let input_adapter = InterleavedSlice::new(&self.pending, self.channels, frames)
            .map_err(|e| EngineError::Processing(format!("interleaved slice (input): {e}")))?;

        let out_capacity_frames = self.out_interleaved.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_interleaved, self.channels, out_capacity_frames)
                .map_err(|e| EngineError::Processing(format!("interleaved slice (output): {e}")))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: if partial { Some(frames) } else { None },
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| EngineError::Processing(format!("resampler process: {e}")))?;

        output.extend_from_slice(&self.out_interleaved[..nbr_out * self.channels]);
        self.pending.drain(..frames * self.channels);
        Ok(())
    }
}

impl ChainStage for ResampleStage {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        while self.pending.len() >= CHUNK_IN_FRAMES * self.channels {
            self.run_chunk(CHUNK_IN_FRAMES, false, output)?;
        }
        Ok(())
    }

    fn seek_performed(&mut self) {
        self.resampler.reset();
        self.pending.clear();
    }

    fn flush(&mut self, output: &mut Vec<f32>) -> Result<()> {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            self.run_chunk(tail_frames, true, output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_to_roughly_half_the_frames() {
        let mut stage = ResampleStage::new(2, 48_000, 24_000, ResampleQuality::Fast).unwrap();
        let mut out = Vec::new();

        let input = vec![0.1f32; 2 * 48_000]; // 1 s stereo
        stage.process(&input, &mut out).unwrap();
        stage.flush(&mut out).unwrap();

        let out_frames = out.len() / 2;
        // The sinc resampler has internal delay; allow generous slack.
        assert!(
            (20_000..=24_500).contains(&out_frames),
            "unexpected output frame count: {out_frames}"
        );
    }

    #[test]
    fn small_inputs_accumulate_until_a_chunk_is_ready() {
        let mut stage = ResampleStage::new(1, 48_000, 48_000, ResampleQuality::Fast).unwrap();
        let mut out = Vec::new();
        stage.process(&[0.5f32; 256], &mut out).unwrap();
        assert!(out.is_empty(), "no output before a full chunk accumulates");
        stage.process(&[0.5f32; 1024], &mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn seek_discards_pending_input() {
        let mut stage = ResampleStage::new(1, 44_100, 48_000, ResampleQuality::Fast).unwrap();
        let mut out = Vec::new();
        stage.process(&[0.5f32; 512], &mut out).unwrap();
        stage.seek_performed();
        stage.flush(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
