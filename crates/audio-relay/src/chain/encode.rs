//! Terminal encode-and-deliver stage.
//!
//! The only stage that writes into the frame buffer: accumulates processed
//! samples into output-sized chunks, applies the configured volume, encodes,
//! and delivers one [`Frame`] per chunk with an advancing timecode.

use std::sync::Arc;

use audio_relay_types::AudioFormat;

use crate::adapter::SampleEncoder;
use crate::buffer::FrameBuffer;
use crate::config::SharedConfiguration;
use crate::error::Result;
use crate::frame::Frame;

pub struct EncodeSink {
    buffer: Arc<FrameBuffer>,
    config: Arc<SharedConfiguration>,
    output_format: AudioFormat,
    encoder: Box<dyn SampleEncoder>,
    /// Interleaved samples awaiting a full output chunk.
    pcm: Vec<f32>,
    timecode_ms: i64,
}

impl EncodeSink {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        config: Arc<SharedConfiguration>,
        output_format: AudioFormat,
        encoder: Box<dyn SampleEncoder>,
    ) -> Self {
        Self {
            buffer,
            config,
            output_format,
            encoder,
            pcm: Vec::new(),
            timecode_ms: 0,
        }
    }

    /// Timecode the next emitted frame will carry.
    pub fn timecode_ms(&self) -> i64 {
        self.timecode_ms
    }

    /// Accumulate samples and deliver every completed chunk.
    ///
    /// The volume is re-read from the shared configuration per chunk, so a
    /// volume change is audible on the next chunk of a running track.
    pub fn process(&mut self, samples: &[f32]) -> Result<()> {
        self.pcm.extend_from_slice(samples);
        let chunk = self.output_format.total_samples_per_chunk();
        while self.pcm.len() >= chunk {
            self.emit_chunk(chunk)?;
        }
        Ok(())
    }

    /// Rebase the timecode and drop any partial chunk.
    pub fn seek_performed(&mut self, provided_ms: i64) {
        self.pcm.clear();
        self.timecode_ms = provided_ms;
    }

    /// Deliver the remaining partial chunk, padded with silence to a full
    /// chunk so every emitted frame has the nominal duration.
    pub fn flush(&mut self) -> Result<()> {
        if self.pcm.is_empty() {
            return Ok(());
        }
        let chunk = self.output_format.total_samples_per_chunk();
        self.pcm.resize(chunk, 0.0);
        self.emit_chunk(chunk)
    }

    pub fn close(&mut self) {
        self.encoder.close();
    }

    fn emit_chunk(&mut self, chunk: usize) -> Result<()> {
        let volume = self.config.volume();
        if volume != 100 {
            let gain = volume as f32 / 100.0;
            for s in &mut self.pcm[..chunk] {
                *s = (*s * gain).clamp(-1.0, 1.0);
            }
        }

        let mut payload = Vec::new();
        self.encoder.encode(&self.pcm[..chunk], &mut payload)?;
        self.buffer.consume(Frame::new(
            self.timecode_ms,
            volume,
            self.output_format,
            payload,
        ));

        self.timecode_ms += self.output_format.chunk_duration_ms() as i64;
        self.pcm.drain(..chunk);
        Ok(())
    }
}
