//! Uniform parameter struct for the synthesis shader.
//!
//! Must match `SynthParams` in `shaders/synth.wgsl` exactly.

use crate::synth::template::split_offset;

/// Per-batch parameters. Four `u32`s, 16 bytes, no padding needed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SynthParams {
    pub base_seconds: u32,
    pub base_remainder: u32,
    pub sample_count: u32,
    pub sample_rate: u32,
}

impl SynthParams {
    pub fn new(sample_offset: u64, sample_count: u32, sample_rate: f64) -> Self {
        let rate = sample_rate.round().max(1.0) as u32;
        let (seconds, remainder) = split_offset(sample_offset, rate);
        Self {
            base_seconds: u32::try_from(seconds).unwrap_or(u32::MAX),
            base_remainder: remainder,
            sample_count,
            sample_rate: rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<SynthParams>(), 16);
    }

    #[test]
    fn test_offset_split() {
        let params = SynthParams::new(44100 * 2 + 10, 64, 44100.0);
        assert_eq!(params.base_seconds, 2);
        assert_eq!(params.base_remainder, 10);
        assert_eq!(params.sample_count, 64);
        assert_eq!(params.sample_rate, 44100);
    }
}
