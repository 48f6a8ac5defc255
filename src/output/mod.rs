//! Audio output devices.
//!
//! The engine talks to a device through [`AudioOutput`]: it reads the device
//! clock, queues segments at absolute device times, and controls gain. Two
//! implementations exist:
//! - [`VirtualOutput`], a manually clocked device for tests and offline use
//! - `CpalOutput` (feature `realtime`), a system output stream
//!
//! Both render through a [`PlaybackQueue`], which turns time-addressed
//! segments into a continuous interleaved stream.

#[cfg(feature = "realtime")]
pub mod cpal_device;
pub mod queue;
pub mod virtual_device;

#[cfg(feature = "realtime")]
pub use cpal_device::CpalOutput;
pub use queue::PlaybackQueue;
pub use virtual_device::{ScheduledSegment, VirtualOutput, VirtualOutputHandle};

use crate::synth::BatchResult;

/// Errors that can occur during device operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// No output device available
    #[error("No audio output device found")]
    NoDevice,

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get a usable stream configuration
    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// The device refused to start (e.g. no user activation yet)
    #[error("Failed to resume audio output: {0}")]
    ResumeFailed(String),

    #[error("Audio output is closed")]
    Closed,
}

/// Planar stereo audio ready to be queued on a device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub sample_rate: f64,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl AudioSegment {
    /// Split interleaved stereo into planar channels. A trailing half frame is dropped.
    pub fn from_interleaved(samples: &[f32], sample_rate: f64) -> Self {
        let frames = samples.len() / 2;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in samples.chunks_exact(2) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
        Self {
            sample_rate,
            left,
            right,
        }
    }

    pub fn from_batch(result: &BatchResult, sample_rate: f64) -> Self {
        Self::from_interleaved(&result.samples, sample_rate)
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }
}

/// A device that plays time-addressed stereo segments.
///
/// Time is the device clock in seconds. It only advances while the device
/// is running.
pub trait AudioOutput {
    fn sample_rate(&self) -> f64;

    /// Start or resume the device clock.
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Device clock in seconds.
    fn current_time(&self) -> f64;

    /// Queue `segment` to begin at device time `start_time`.
    fn schedule(&mut self, segment: AudioSegment, start_time: f64) -> Result<(), DeviceError>;

    /// Drop every queued segment, including the one playing.
    fn cancel_all(&mut self);

    /// Output gain in `[0, 1]`.
    fn set_gain(&mut self, gain: f32);

    /// Stop the device and release it. Later calls fail with [`DeviceError::Closed`].
    fn close(&mut self);
}

impl AudioOutput for Box<dyn AudioOutput> {
    fn sample_rate(&self) -> f64 {
        (**self).sample_rate()
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        (**self).resume()
    }

    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn schedule(&mut self, segment: AudioSegment, start_time: f64) -> Result<(), DeviceError> {
        (**self).schedule(segment, start_time)
    }

    fn cancel_all(&mut self) {
        (**self).cancel_all()
    }

    fn set_gain(&mut self, gain: f32) {
        (**self).set_gain(gain)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_from_interleaved() {
        let segment = AudioSegment::from_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3], 4.0);
        assert_eq!(segment.left, vec![0.1, 0.2]);
        assert_eq!(segment.right, vec![-0.1, -0.2]);
        assert_eq!(segment.frames(), 2);
        assert_eq!(segment.duration(), 0.5);
    }

    #[test]
    fn test_segment_from_batch() {
        let samples: Vec<f32> = (0..4410).flat_map(|_| [1.0, -1.0]).collect();
        let batch = BatchResult::from_interleaved(0, samples);
        let segment = AudioSegment::from_batch(&batch, 44100.0);
        assert_eq!(segment.frames(), 4410);
        assert!((segment.duration() - 0.1).abs() < 1e-12);
    }
}
