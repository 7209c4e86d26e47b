//! Symphonia-backed decode-side adapter.
//!
//! Wraps a Symphonia codec decoder behind [`CodecAdapter`] so sources whose
//! packets Symphonia can decode (MP3, AAC, Vorbis, FLAC, ...) plug into the
//! router's decode path without a native codec. Encode is not provided by
//! Symphonia and is rejected.

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, CodecType, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use super::{CodecAdapter, CodecProfile};
use crate::error::{EngineError, Result};

pub struct SymphoniaDecodeAdapter {
    codec: CodecType,
    decoder: Option<Box<dyn Decoder>>,
    pending: Vec<u8>,
    packet_ts: u64,
}

impl SymphoniaDecodeAdapter {
    /// Build an adapter for `codec`, configured for `profile`.
    pub fn new(codec: CodecType, profile: CodecProfile) -> Result<Self> {
        let mut adapter = Self {
            codec,
            decoder: None,
            pending: Vec::new(),
            packet_ts: 0,
        };
        adapter.configure(profile)?;
        Ok(adapter)
    }

    fn channel_layout(channels: u16) -> Result<Channels> {
        match channels {
            1 => Ok(Channels::FRONT_LEFT),
            2 => Ok(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
            other => Err(EngineError::CodecConfiguration(format!(
                "unsupported channel count: {other}"
            ))),
        }
    }
}

impl CodecAdapter for SymphoniaDecodeAdapter {
    fn configure(&mut self, profile: CodecProfile) -> Result<()> {
        let mut params = CodecParameters::new();
        params
            .for_codec(self.codec)
            .with_sample_rate(profile.sample_rate)
            .with_channels(Self::channel_layout(profile.channels)?);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| EngineError::CodecConfiguration(format!("decoder init: {e}")))?;

        self.decoder = Some(decoder);
        self.pending.clear();
        self.packet_ts = 0;
        Ok(())
    }

    fn fill(&mut self, input: &[u8]) -> Result<usize> {
        self.pending.extend_from_slice(input);
        Ok(input.len())
    }

    fn decode(&mut self, output: &mut Vec<f32>, _flush: bool) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| EngineError::CodecConfiguration("decoder not configured".into()))?;

        let packet = Packet::new_from_slice(0, self.packet_ts, 0, &self.pending);
        self.pending.clear();
        self.packet_ts = self.packet_ts.wrapping_add(1);

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| EngineError::CodecConfiguration(format!("decode: {e}")))?;

        if decoded.frames() == 0 {
            return Ok(false);
        }
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        output.extend_from_slice(sample_buf.samples());
        Ok(true)
    }

    fn encode(&mut self, _samples: &[f32], _out: &mut Vec<u8>) -> Result<()> {
        Err(EngineError::CodecConfiguration(
            "symphonia adapter does not encode".into(),
        ))
    }

    fn close(&mut self) {
        self.decoder = None;
        self.pending.clear();
    }
}
