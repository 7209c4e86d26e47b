//! Pipeline wiring: builds the minimal filter chain for an input format.
//!
//! Stages are inserted only when needed: channel remap when channel counts
//! differ, resampling when rates differ, a user filter stage when a filter
//! factory is configured, and always the terminal encode-and-deliver stage.

use std::sync::Arc;

use audio_relay_types::AudioFormat;

use crate::adapter::EncoderFactory;
use crate::buffer::FrameBuffer;
use crate::chain::ChainStage;
use crate::chain::encode::EncodeSink;
use crate::chain::remix::RemixStage;
use crate::chain::resample::ResampleStage;
use crate::chain::user::UserFilterStage;
use crate::config::{PlaybackConfiguration, SharedConfiguration};
use crate::error::Result;

/// Everything a pipeline (and the router that owns it) needs to operate.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<SharedConfiguration>,
    pub buffer: Arc<FrameBuffer>,
    pub encoders: Arc<dyn EncoderFactory>,
}

/// `true` iff a chunk of `input_format` audio cannot be forwarded untouched:
/// the output format differs, the volume is not unity, or user filters are
/// configured. This single predicate is the basis for the packet router's
/// passthrough decision.
pub fn is_processing_required(
    config: &PlaybackConfiguration,
    input_format: AudioFormat,
) -> bool {
    config.output_format != input_format || config.volume != 100 || config.filter_factory.is_some()
}

pub struct Pipeline {
    stages: Vec<Box<dyn ChainStage>>,
    /// Index of the user filter stage in `stages`, if present.
    user_stage: Option<usize>,
    sink: EncodeSink,
    config: Arc<SharedConfiguration>,
    hot_swap: bool,
    filter_generation: u64,
    scratch_a: Vec<f32>,
    scratch_b: Vec<f32>,
}

impl Pipeline {
    /// Build the minimal chain required to turn `input_format` PCM into
    /// output-format frames.
    pub fn create(ctx: &PipelineContext, input_format: AudioFormat) -> Result<Pipeline> {
        let snapshot = ctx.config.snapshot();
        let out = snapshot.output_format;

        let mut stages: Vec<Box<dyn ChainStage>> = Vec::new();

        if input_format.channels != out.channels {
            stages.push(Box::new(RemixStage::new(
                input_format.channels,
                out.channels,
            )));
        }
        if input_format.sample_rate != out.sample_rate {
            stages.push(Box::new(ResampleStage::new(
                out.channels,
                input_format.sample_rate,
                out.sample_rate,
                snapshot.resample_quality,
            )?));
        } else {
            tracing::debug!(rate_hz = out.sample_rate, "resample skipped");
        }

        let mut user_stage = None;
        if let Some(factory) = &snapshot.filter_factory {
            stages.push(Box::new(UserFilterStage::new(factory.as_ref(), out)));
            user_stage = Some(stages.len() - 1);
        }

        let encoder = ctx.encoders.create(out)?;
        let sink = EncodeSink::new(ctx.buffer.clone(), ctx.config.clone(), out, encoder);

        tracing::info!(
            stages = stages.len(),
            in_channels = input_format.channels,
            in_rate_hz = input_format.sample_rate,
            out_rate_hz = out.sample_rate,
            "pipeline created"
        );

        Ok(Pipeline {
            stages,
            user_stage,
            sink,
            config: ctx.config.clone(),
            hot_swap: snapshot.hot_swap_filters,
            filter_generation: ctx.config.filter_generation(),
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
        })
    }

    /// Timecode the next delivered frame will carry.
    pub fn timecode_ms(&self) -> i64 {
        self.sink.timecode_ms()
    }

    /// Push one chunk of interleaved `f32` samples through every stage.
    pub fn process(&mut self, samples: &[f32]) -> Result<()> {
        self.maybe_swap_filters();

        self.scratch_a.clear();
        self.scratch_a.extend_from_slice(samples);
        for stage in &mut self.stages {
            self.scratch_b.clear();
            stage.process(&self.scratch_a, &mut self.scratch_b)?;
            std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
        }
        self.sink.process(&self.scratch_a)
    }

    /// Propagate a performed seek to every stage so internal state resets,
    /// and rebase the output timecode to the achieved position.
    pub fn seek_performed(&mut self, requested_ms: i64, provided_ms: i64) {
        for stage in &mut self.stages {
            stage.seek_performed();
        }
        self.sink.seek_performed(provided_ms);
        tracing::debug!(requested_ms, provided_ms, "pipeline seek applied");
    }

    /// Drain stage-internal look-ahead at end of stream, cascading each
    /// stage's remainder through the stages after it.
    pub fn flush(&mut self) -> Result<()> {
        for i in 0..self.stages.len() {
            let (head, tail) = self.stages.split_at_mut(i + 1);
            self.scratch_a.clear();
            head[i].flush(&mut self.scratch_a)?;
            if self.scratch_a.is_empty() {
                continue;
            }
            for stage in tail {
                self.scratch_b.clear();
                stage.process(&self.scratch_a, &mut self.scratch_b)?;
                std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
            }
            self.sink.process(&self.scratch_a)?;
        }
        self.sink.flush()
    }

    /// Release all stage resources, innermost (terminal) first.
    pub fn close(&mut self) {
        self.sink.close();
        for stage in self.stages.iter_mut().rev() {
            stage.close();
        }
    }

    /// Tear down and rebuild only the user filter stage when the configured
    /// factory changed, without rebuilding the rest of the chain.
    fn maybe_swap_filters(&mut self) {
        if !self.hot_swap {
            return;
        }
        let generation = self.config.filter_generation();
        if generation == self.filter_generation {
            return;
        }
        self.filter_generation = generation;

        let snapshot = self.config.snapshot();
        let out = snapshot.output_format;
        match (&snapshot.filter_factory, self.user_stage) {
            (Some(factory), Some(i)) => {
                self.stages[i].close();
                self.stages[i] = Box::new(UserFilterStage::new(factory.as_ref(), out));
            }
            (Some(factory), None) => {
                self.stages
                    .push(Box::new(UserFilterStage::new(factory.as_ref(), out)));
                self.user_stage = Some(self.stages.len() - 1);
            }
            (None, Some(i)) => {
                self.stages[i].close();
                self.stages.remove(i);
                self.user_stage = None;
            }
            (None, None) => {}
        }
        tracing::info!("user filter stage rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PcmEncoderFactory;
    use crate::buffer::Provided;
    use crate::chain::user::{AudioFilter, FilterFactory};
    use audio_relay_types::AudioCodec;

    fn pcm16(channels: u16, rate: u32) -> AudioFormat {
        AudioFormat::new(channels, rate, 480, AudioCodec::Pcm16)
    }

    fn context(config: PlaybackConfiguration) -> PipelineContext {
        PipelineContext {
            config: SharedConfiguration::new(config),
            buffer: Arc::new(FrameBuffer::with_capacity(64)),
            encoders: Arc::new(PcmEncoderFactory),
        }
    }

    struct Halver;

    impl AudioFilter for Halver {
        fn process(&mut self, samples: &mut [f32]) -> crate::error::Result<()> {
            for s in samples.iter_mut() {
                *s *= 0.5;
            }
            Ok(())
        }
    }

    struct HalverFactory;

    impl FilterFactory for HalverFactory {
        fn create(&self, _format: AudioFormat) -> Vec<Box<dyn AudioFilter>> {
            vec![Box::new(Halver)]
        }
    }

    #[test]
    fn is_processing_required_truth_table() {
        let format = pcm16(2, 48_000);
        let mut config = PlaybackConfiguration {
            output_format: format,
            volume: 100,
            ..PlaybackConfiguration::default()
        };
        assert!(!is_processing_required(&config, format));

        config.volume = 99;
        assert!(is_processing_required(&config, format));

        config.volume = 100;
        config.filter_factory = Some(Arc::new(HalverFactory));
        assert!(is_processing_required(&config, format));

        config.filter_factory = None;
        assert!(is_processing_required(&config, pcm16(1, 48_000)));
        assert!(is_processing_required(&config, pcm16(2, 44_100)));
    }

    #[test]
    fn identity_pipeline_has_no_transform_stages() {
        let format = pcm16(2, 48_000);
        let ctx = context(PlaybackConfiguration {
            output_format: format,
            ..PlaybackConfiguration::default()
        });
        let pipeline = Pipeline::create(&ctx, format).unwrap();
        assert!(pipeline.stages.is_empty());
    }

    #[test]
    fn remix_stage_inserted_for_channel_mismatch() {
        let ctx = context(PlaybackConfiguration {
            output_format: pcm16(2, 48_000),
            ..PlaybackConfiguration::default()
        });
        let mut pipeline = Pipeline::create(&ctx, pcm16(1, 48_000)).unwrap();
        assert_eq!(pipeline.stages.len(), 1);

        // Mono input becomes stereo output chunks.
        pipeline.process(&vec![0.25f32; 480]).unwrap();
        match ctx.buffer.provide() {
            Provided::Frame(f) => assert_eq!(f.payload.len(), 480 * 2 * 2),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn seek_resyncs_timecode_through_arbitrary_chains() {
        // Remix + resample + filters all present.
        let ctx = context(PlaybackConfiguration {
            output_format: pcm16(2, 48_000),
            filter_factory: Some(Arc::new(HalverFactory)),
            ..PlaybackConfiguration::default()
        });
        let mut pipeline = Pipeline::create(&ctx, pcm16(1, 44_100)).unwrap();
        assert_eq!(pipeline.stages.len(), 3);

        pipeline.seek_performed(5_000, 4_980);
        assert_eq!(pipeline.timecode_ms(), 4_980);

        // Enough input to emit at least one chunk after resampling.
        pipeline.process(&vec![0.1f32; 8_192]).unwrap();
        pipeline.flush().unwrap();
        match ctx.buffer.provide() {
            Provided::Frame(f) => assert_eq!(f.timecode_ms, 4_980),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn hot_swap_rebuilds_only_the_user_stage() {
        let format = pcm16(1, 48_000);
        let ctx = context(PlaybackConfiguration {
            output_format: format,
            hot_swap_filters: true,
            ..PlaybackConfiguration::default()
        });
        let mut pipeline = Pipeline::create(&ctx, format).unwrap();
        assert!(pipeline.user_stage.is_none());

        pipeline.process(&[0.8f32; 480]).unwrap();
        let unfiltered = match ctx.buffer.provide() {
            Provided::Frame(f) => f.payload,
            other => panic!("expected frame, got {other:?}"),
        };

        ctx.config.set_filter_factory(Some(Arc::new(HalverFactory)));
        pipeline.process(&[0.8f32; 480]).unwrap();
        let filtered = match ctx.buffer.provide() {
            Provided::Frame(f) => f.payload,
            other => panic!("expected frame, got {other:?}"),
        };

        assert!(pipeline.user_stage.is_some());
        assert_ne!(unfiltered, filtered);

        ctx.config.set_filter_factory(None);
        pipeline.process(&[0.8f32; 480]).unwrap();
        assert!(pipeline.user_stage.is_none());
    }

    #[test]
    fn filter_change_ignored_without_hot_swap() {
        let format = pcm16(1, 48_000);
        let ctx = context(PlaybackConfiguration {
            output_format: format,
            hot_swap_filters: false,
            ..PlaybackConfiguration::default()
        });
        let mut pipeline = Pipeline::create(&ctx, format).unwrap();
        ctx.config.set_filter_factory(Some(Arc::new(HalverFactory)));
        pipeline.process(&[0.5f32; 480]).unwrap();
        assert!(pipeline.user_stage.is_none());
    }
}
