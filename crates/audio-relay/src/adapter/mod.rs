//! Codec adapter boundary.
//!
//! Decoders and encoders are external resources with explicit lifetimes; this
//! module only defines *when* they are called and how their native handles
//! are released. [`ScopedAdapter`] guarantees exactly-once release on every
//! exit path (normal close, profile-change replace, error), with no reliance
//! on finalization.

pub mod mock;
pub mod symphonia;

use audio_relay_types::{AudioCodec, AudioFormat};

use crate::error::{EngineError, Result};

/// Parameters a codec adapter must be configured with before decoding.
///
/// Equality is compared per packet; decoder state never silently carries over
/// a profile change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecProfile {
    pub channels: u16,
    pub sample_rate: u32,
    /// Codec-specific object/application type; 0 when the codec has none.
    pub object_type: u8,
}

/// An opaque decoder/encoder resource.
///
/// Implementations wrap a native or library codec. The engine manages the
/// call order and the handle lifetime, never the codec internals.
pub trait CodecAdapter: Send {
    /// Reconfigure for a new profile, resetting all internal state.
    fn configure(&mut self, profile: CodecProfile) -> Result<()>;

    /// Buffer encoded input bytes; returns the number of bytes consumed.
    fn fill(&mut self, input: &[u8]) -> Result<usize>;

    /// Decode buffered input into interleaved `f32` samples appended to
    /// `output`. Returns `true` when samples were produced. With `flush` set,
    /// drains any decoder look-ahead at end of stream.
    fn decode(&mut self, output: &mut Vec<f32>, flush: bool) -> Result<bool>;

    /// Encode interleaved `f32` samples into `out`.
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()>;

    /// Release the underlying resource. Called at most once by the engine.
    fn close(&mut self);
}

/// Creates codec adapters for a given profile.
///
/// The router goes through a factory so tests can count adapter lifecycles
/// and callers can plug in native codec implementations.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, profile: CodecProfile) -> Result<Box<dyn CodecAdapter>>;
}

/// Scoped ownership of a [`CodecAdapter`] with guaranteed single release.
///
/// Release happens on explicit [`release`](Self::release) or on drop,
/// whichever comes first.
pub struct ScopedAdapter {
    inner: Option<Box<dyn CodecAdapter>>,
    profile: CodecProfile,
}

impl ScopedAdapter {
    pub fn new(adapter: Box<dyn CodecAdapter>, profile: CodecProfile) -> Self {
        Self {
            inner: Some(adapter),
            profile,
        }
    }

    /// Profile the adapter was created for.
    pub fn profile(&self) -> CodecProfile {
        self.profile
    }

    /// Access the adapter; fails if it was already released.
    pub fn get_mut(&mut self) -> Result<&mut (dyn CodecAdapter + 'static)> {
        self.inner
            .as_deref_mut()
            .ok_or_else(|| EngineError::CodecConfiguration("adapter already released".into()))
    }

    /// Close and drop the underlying adapter. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut adapter) = self.inner.take() {
            adapter.close();
        }
    }
}

impl Drop for ScopedAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

/// Encodes final-stage `f32` samples into output payload bytes.
pub trait SampleEncoder: Send {
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()>;

    fn close(&mut self) {}
}

/// Creates the terminal-stage encoder for a given output format.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn SampleEncoder>>;
}

/// Built-in encoder factory for the PCM output codecs.
///
/// Bitstream codecs (Opus) need an external encoder supplied by the caller.
pub struct PcmEncoderFactory;

impl EncoderFactory for PcmEncoderFactory {
    fn create(&self, format: AudioFormat) -> Result<Box<dyn SampleEncoder>> {
        match format.codec {
            AudioCodec::Pcm16 => Ok(Box::new(Pcm16Encoder)),
            AudioCodec::PcmF32 => Ok(Box::new(PcmF32Encoder)),
            AudioCodec::Opus => Err(EngineError::CodecConfiguration(
                "opus output requires an external encoder".into(),
            )),
        }
    }
}

struct Pcm16Encoder;

impl SampleEncoder for Pcm16Encoder {
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(samples.len() * 2);
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }
}

struct PcmF32Encoder;

impl SampleEncoder for PcmF32Encoder {
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(samples.len() * 4);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAdapterFactory;
    use super::*;

    fn profile() -> CodecProfile {
        CodecProfile {
            channels: 2,
            sample_rate: 48_000,
            object_type: 0,
        }
    }

    #[test]
    fn scoped_adapter_releases_exactly_once() {
        let factory = MockAdapterFactory::new();
        let adapter = factory.create(profile()).unwrap();
        let mut scoped = ScopedAdapter::new(adapter, profile());

        scoped.release();
        scoped.release(); // idempotent
        drop(scoped);
        assert_eq!(factory.closed_count(), 1);
    }

    #[test]
    fn scoped_adapter_releases_on_drop() {
        let factory = MockAdapterFactory::new();
        {
            let adapter = factory.create(profile()).unwrap();
            let _scoped = ScopedAdapter::new(adapter, profile());
        }
        assert_eq!(factory.closed_count(), 1);
    }

    #[test]
    fn released_adapter_refuses_access() {
        let factory = MockAdapterFactory::new();
        let mut scoped = ScopedAdapter::new(factory.create(profile()).unwrap(), profile());
        scoped.release();
        assert!(scoped.get_mut().is_err());
    }

    #[test]
    fn pcm16_encoder_clamps_and_packs_little_endian() {
        let mut enc = Pcm16Encoder;
        let mut out = Vec::new();
        enc.encode(&[0.0, 1.0, -1.0, 2.0], &mut out).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(&out[0..2], &0i16.to_le_bytes());
        assert_eq!(&out[2..4], &32767i16.to_le_bytes());
        assert_eq!(&out[4..6], &(-32767i16).to_le_bytes());
        // Over-range input clamps instead of wrapping.
        assert_eq!(&out[6..8], &32767i16.to_le_bytes());
    }

    #[test]
    fn pcm_factory_rejects_opus_output() {
        let format = AudioFormat::new(2, 48_000, 960, AudioCodec::Opus);
        assert!(PcmEncoderFactory.create(format).is_err());
    }
}
