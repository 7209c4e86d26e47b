//! Opus packet router.
//!
//! Decides per packet whether encoded Opus input can be forwarded to the
//! frame buffer untouched (passthrough) or must be decoded and run through
//! the processing pipeline. The decision is re-evaluated against the live
//! configuration on every packet, so a volume or filter change flips the
//! route at a packet boundary.

use std::sync::Arc;

use audio_relay_types::{AudioCodec, AudioFormat};

use crate::adapter::{AdapterFactory, CodecProfile, ScopedAdapter};
use crate::error::{EngineError, Result};
use crate::frame::Frame;
use crate::pipeline::{Pipeline, PipelineContext, is_processing_required};

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Samples in one Opus frame at 48 kHz, derived from the TOC byte.
fn opus_frame_samples(toc: u8) -> u32 {
    if toc & 0x80 != 0 {
        // CELT-only: 2.5/5/10/20 ms
        120 << ((toc >> 3) & 0x03)
    } else if toc & 0x60 == 0x60 {
        // Hybrid: 10 or 20 ms
        if toc & 0x08 != 0 { 960 } else { 480 }
    } else {
        // SILK-only: 10/20/40/60 ms
        match (toc >> 3) & 0x03 {
            3 => 2880,
            x => 480 << x,
        }
    }
}

/// Total duration of an Opus packet in samples at 48 kHz.
pub fn opus_packet_samples(packet: &[u8]) -> Result<u32> {
    let toc = *packet
        .first()
        .ok_or_else(|| EngineError::CodecConfiguration("empty opus packet".into()))?;
    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => {
            let count = packet
                .get(1)
                .ok_or_else(|| EngineError::CodecConfiguration("truncated opus packet".into()))?;
            (count & 0x3F) as u32
        }
    };
    if frames == 0 {
        return Err(EngineError::CodecConfiguration(
            "opus packet with zero frames".into(),
        ));
    }
    Ok(opus_frame_samples(toc) * frames)
}

/// Coded channel count of an Opus packet (mono or stereo).
pub fn opus_packet_channels(packet: &[u8]) -> Result<u16> {
    let toc = *packet
        .first()
        .ok_or_else(|| EngineError::CodecConfiguration("empty opus packet".into()))?;
    Ok(if toc & 0x04 != 0 { 2 } else { 1 })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterMode {
    /// Packets are forwarded as-is; no decoder or pipeline exists.
    Passthrough,
    /// Packets are decoded and pushed through the processing chain.
    Decoding,
}

/// Routes encoded Opus packets into the frame buffer, directly or through a
/// decode-process-encode path depending on the active configuration.
pub struct OpusPacketRouter {
    ctx: PipelineContext,
    adapters: Arc<dyn AdapterFactory>,
    mode: Option<RouterMode>,
    /// Track position of the *next* packet, in milliseconds.
    timecode_ms: i64,
    adapter: Option<ScopedAdapter>,
    pipeline: Option<Pipeline>,
    decode_buf: Vec<f32>,
}

impl OpusPacketRouter {
    pub fn new(ctx: PipelineContext, adapters: Arc<dyn AdapterFactory>) -> Self {
        Self {
            ctx,
            adapters,
            mode: None,
            timecode_ms: 0,
            adapter: None,
            pipeline: None,
            decode_buf: Vec::new(),
        }
    }

    /// Route currently in effect; `None` before the first packet.
    pub fn mode(&self) -> Option<RouterMode> {
        self.mode
    }

    /// Track position of the next packet in milliseconds.
    pub fn timecode_ms(&self) -> i64 {
        self.timecode_ms
    }

    /// Route one encoded packet. The packet's duration and channel layout are
    /// read from its TOC byte; the passthrough-or-decode decision is made
    /// against the current configuration snapshot.
    pub fn process(&mut self, packet: &[u8]) -> Result<()> {
        let duration_samples = opus_packet_samples(packet)?;
        let channels = opus_packet_channels(packet)?;
        let packet_format =
            AudioFormat::new(channels, OPUS_SAMPLE_RATE, duration_samples, AudioCodec::Opus);
        let profile = CodecProfile {
            channels,
            sample_rate: OPUS_SAMPLE_RATE,
            object_type: 0,
        };

        let snapshot = self.ctx.config.snapshot();
        if is_processing_required(&snapshot, packet_format) {
            self.route_decoding(packet, profile)?;
        } else {
            self.route_passthrough(packet, packet_format);
        }

        self.timecode_ms += (duration_samples as i64 * 1000) / OPUS_SAMPLE_RATE as i64;
        Ok(())
    }

    /// Apply a performed seek: rebase the timecode and reset every stateful
    /// component so no pre-seek audio leaks past the discontinuity.
    pub fn seek_performed(&mut self, requested_ms: i64, provided_ms: i64) {
        self.timecode_ms = provided_ms;
        self.decode_buf.clear();
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.seek_performed(requested_ms, provided_ms);
        }
        if let Some(adapter) = &mut self.adapter {
            let profile = adapter.profile();
            let result = adapter.get_mut().and_then(|a| a.configure(profile));
            if let Err(error) = result {
                // A decoder that fails to reset will be rebuilt on the next
                // profile check; playback continues.
                tracing::warn!(%error, "decoder reset after seek failed");
            }
        }
    }

    /// Drain decoder look-ahead and pipeline remainders at end of stream.
    pub fn flush(&mut self) -> Result<()> {
        if let (Some(adapter), Some(pipeline)) = (&mut self.adapter, &mut self.pipeline) {
            loop {
                self.decode_buf.clear();
                if !adapter.get_mut()?.decode(&mut self.decode_buf, true)? {
                    break;
                }
                pipeline.process(&self.decode_buf)?;
            }
            pipeline.flush()?;
        }
        Ok(())
    }

    /// Release the decoder and pipeline. The router must not be used after.
    pub fn close(&mut self) {
        self.teardown_decode_path(true);
    }

    fn route_passthrough(&mut self, packet: &[u8], packet_format: AudioFormat) {
        if self.mode != Some(RouterMode::Passthrough) {
            // Switching away from decoding discards in-flight decoded audio;
            // the new packet supersedes it.
            self.teardown_decode_path(false);
            self.mode = Some(RouterMode::Passthrough);
            tracing::debug!(timecode_ms = self.timecode_ms, "router entering passthrough");
        }
        self.ctx.buffer.consume(Frame::new(
            self.timecode_ms,
            100,
            packet_format,
            packet.to_vec(),
        ));
    }

    fn route_decoding(&mut self, packet: &[u8], profile: CodecProfile) -> Result<()> {
        if self.mode != Some(RouterMode::Decoding) {
            self.mode = Some(RouterMode::Decoding);
            tracing::debug!(timecode_ms = self.timecode_ms, "router entering decode path");
        }
        self.ensure_decode_path(profile)?;

        let adapter = self
            .adapter
            .as_mut()
            .ok_or_else(|| EngineError::CodecConfiguration("decode path missing adapter".into()))?
            .get_mut()?;
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| EngineError::CodecConfiguration("decode path missing pipeline".into()))?;

        adapter.fill(packet)?;
        loop {
            self.decode_buf.clear();
            if !adapter.decode(&mut self.decode_buf, false)? {
                break;
            }
            pipeline.process(&self.decode_buf)?;
        }
        Ok(())
    }

    /// Create or rebuild the decoder and pipeline when absent or when the
    /// packet's coded profile no longer matches the adapter's.
    fn ensure_decode_path(&mut self, profile: CodecProfile) -> Result<()> {
        let rebuild = match &self.adapter {
            Some(adapter) => adapter.profile() != profile,
            None => true,
        };
        if !rebuild {
            return Ok(());
        }

        if self.adapter.is_some() {
            tracing::info!(
                channels = profile.channels,
                sample_rate = profile.sample_rate,
                "codec profile changed, rebuilding decode path"
            );
        }
        self.teardown_decode_path(false);

        // Build into locals first so a failure leaves the router with no
        // half-initialized decode path.
        let adapter = ScopedAdapter::new(self.adapters.create(profile)?, profile);
        let input_format = AudioFormat::new(
            profile.channels,
            profile.sample_rate,
            self.ctx.config.snapshot().output_format.chunk_samples,
            AudioCodec::PcmF32,
        );
        let mut pipeline = Pipeline::create(&self.ctx, input_format)?;
        pipeline.seek_performed(self.timecode_ms, self.timecode_ms);

        self.adapter = Some(adapter);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn teardown_decode_path(&mut self, closing: bool) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.release();
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.close();
        }
        if closing {
            self.mode = None;
        }
        self.decode_buf.clear();
    }
}
