//! Channel remapping stage.

use super::ChainStage;
use crate::error::Result;

/// Maps interleaved frames from one channel count to another.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
pub struct RemixStage {
    src_channels: usize,
    dst_channels: usize,
}

impl RemixStage {
    pub fn new(src_channels: u16, dst_channels: u16) -> Self {
        Self {
            src_channels: (src_channels as usize).max(1),
            dst_channels: (dst_channels as usize).max(1),
        }
    }
}

impl ChainStage for RemixStage {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let frames = input.len() / self.src_channels;
        output.reserve(frames * self.dst_channels);

        for frame in 0..frames {
            let base = frame * self.src_channels;
            let src = |ch: usize| input.get(base + ch).copied().unwrap_or(0.0);

            for dst_ch in 0..self.dst_channels {
                let sample = match (self.src_channels, self.dst_channels) {
                    (1, _) => src(0),
                    (2, 1) => 0.5 * (src(0) + src(1)),
                    (2, 2) => src(dst_ch.min(1)),
                    _ => src(dst_ch.min(self.src_channels - 1)),
                };
                output.push(sample);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_to_stereo_duplicates() {
        let mut stage = RemixStage::new(1, 2);
        let mut out = Vec::new();
        stage.process(&[0.5, -0.25], &mut out).unwrap();
        assert_eq!(out, vec![0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let mut stage = RemixStage::new(2, 1);
        let mut out = Vec::new();
        stage.process(&[1.0, 0.0, -0.5, -0.5], &mut out).unwrap();
        assert_eq!(out, vec![0.5, -0.5]);
    }

    #[test]
    fn unusual_layouts_clamp() {
        let mut stage = RemixStage::new(4, 2);
        let mut out = Vec::new();
        stage.process(&[0.1, 0.2, 0.3, 0.4], &mut out).unwrap();
        assert_eq!(out, vec![0.1, 0.2]);
    }
}
