//! Deterministic codec adapter stand-ins.
//!
//! Used by the engine's own tests and useful for downstream integration
//! tests: decode synthesizes predictable PCM from packet bytes, encode
//! quantizes samples to one byte each, and factories count adapter
//! lifecycles so passthrough/profile-change behavior can be asserted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use audio_relay_types::AudioFormat;

use super::{AdapterFactory, CodecAdapter, CodecProfile, EncoderFactory, SampleEncoder};
use crate::error::Result;

/// Factory producing [`MockAdapter`]s and counting create/close calls.
#[derive(Clone, Default)]
pub struct MockAdapterFactory {
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of adapters created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of adapters closed so far.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn create(&self, profile: CodecProfile) -> Result<Box<dyn CodecAdapter>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockAdapter {
            profile,
            pending: Vec::new(),
            closed: self.closed.clone(),
            open: true,
        }))
    }
}

/// Adapter with fully deterministic decode/encode behavior.
pub struct MockAdapter {
    profile: CodecProfile,
    pending: Vec<u8>,
    closed: Arc<AtomicUsize>,
    open: bool,
}

impl CodecAdapter for MockAdapter {
    fn configure(&mut self, profile: CodecProfile) -> Result<()> {
        self.profile = profile;
        self.pending.clear();
        Ok(())
    }

    fn fill(&mut self, input: &[u8]) -> Result<usize> {
        self.pending.extend_from_slice(input);
        Ok(input.len())
    }

    /// Each buffered byte becomes one sample frame: the byte is mapped to
    /// [-1, 1] and duplicated across all configured channels.
    fn decode(&mut self, output: &mut Vec<f32>, _flush: bool) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        for &b in &self.pending {
            let sample = (b as f32 - 128.0) / 128.0;
            for _ in 0..self.profile.channels {
                output.push(sample);
            }
        }
        self.pending.clear();
        Ok(true)
    }

    /// Quantizes each sample to a single signed byte.
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()> {
        for s in samples {
            out.push((s.clamp(-1.0, 1.0) * 127.0) as i8 as u8);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Encoder factory accepting any output format, quantizing to one byte per
/// sample. Lets tests exercise pipelines with an Opus output format without a
/// real Opus encoder.
#[derive(Clone, Default)]
pub struct MockEncoderFactory;

impl EncoderFactory for MockEncoderFactory {
    fn create(&self, _format: AudioFormat) -> Result<Box<dyn SampleEncoder>> {
        Ok(Box::new(MockEncoder))
    }
}

struct MockEncoder;

impl SampleEncoder for MockEncoder {
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()> {
        for s in samples {
            out.push((s.clamp(-1.0, 1.0) * 127.0) as i8 as u8);
        }
        Ok(())
    }
}
