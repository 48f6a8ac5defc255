//! System audio output through CPAL.
//!
//! ```text
//! ┌──────────────────┐  schedule()   ┌──────────────────┐  render()  ┌────────────────┐
//! │  Control Thread  │ ────────────► │  PlaybackQueue   │ ─────────► │  CPAL callback │
//! │  (Engine::tick)  │   (mutex)     │                  │            │  (audio thread)│
//! └──────────────────┘               └──────────────────┘            └───────┬────────┘
//!          ▲                                                                 │
//!          └──────────── frames played, gain (atomics) ◄────────────────────┘
//! ```
//!
//! The callback holds the queue lock only while copying one device buffer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::{AudioOutput, AudioSegment, DeviceError, PlaybackQueue};

const DEFAULT_SAMPLE_RATE: u32 = 48000;

struct SharedState {
    queue: Mutex<PlaybackQueue>,
    frames_played: AtomicU64,
    gain_bits: AtomicU32,
}

/// Default (or named) output device playing through a [`PlaybackQueue`].
pub struct CpalOutput {
    stream: Option<Stream>,
    shared: Arc<SharedState>,
    sample_rate: u32,
    device_name: String,
}

impl CpalOutput {
    /// Open the default output device.
    pub fn open_default(sample_rate: Option<u32>) -> Result<Self, DeviceError> {
        Self::open(None, sample_rate)
    }

    /// Open an output device by name, or the default one. The stream is built
    /// paused; [`AudioOutput::resume`] starts it.
    pub fn open(device_name: Option<&str>, sample_rate: Option<u32>) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| DeviceError::Config(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?,
            None => host.default_output_device().ok_or(DeviceError::NoDevice)?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", device_name);

        let stream_config = output_config(&device, sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE))?;
        let rate = stream_config.sample_rate.0;
        log::info!(
            "Audio config: {} channels, {}Hz",
            stream_config.channels,
            rate
        );

        let shared = Arc::new(SharedState {
            queue: Mutex::new(PlaybackQueue::new(f64::from(rate))),
            frames_played: AtomicU64::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
        });

        let stream = build_output_stream(&device, &stream_config, shared.clone())?;
        if let Err(e) = stream.pause() {
            log::debug!("Stream could not be paused after build: {}", e);
        }

        Ok(Self {
            stream: Some(stream),
            shared,
            sample_rate: rate,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn output_config(device: &cpal::Device, target_rate: u32) -> Result<StreamConfig, DeviceError> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Config(e.to_string()))?
        .collect();
    choose_config(&supported, target_rate)
}

/// Pick an f32 config, preferring at least two channels at `target_rate`,
/// then any stereo rate, then any channel count.
///
/// The stream callback renders f32 only, so other formats are never chosen.
fn choose_config(
    supported: &[cpal::SupportedStreamConfigRange],
    target_rate: u32,
) -> Result<StreamConfig, DeviceError> {
    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0
    };

    let float: Vec<_> = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();
    if float.is_empty() && !supported.is_empty() {
        log::error!(
            "Audio device offers only {:?} output; f32 is required",
            supported.iter().map(|c| c.sample_format()).collect::<Vec<_>>()
        );
    }

    let best: &cpal::SupportedStreamConfigRange = float
        .iter()
        .copied()
        .find(|c| c.channels() >= 2 && in_range(*c))
        .or_else(|| float.iter().copied().find(|c| c.channels() >= 2))
        .or_else(|| float.first().copied())
        .ok_or_else(|| DeviceError::Config("No f32 output configuration".to_string()))?;

    let sample_rate = if in_range(best) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    Ok(best.clone().with_sample_rate(sample_rate).config())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<SharedState>,
) -> Result<Stream, DeviceError> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut queue = shared
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.set_gain(f32::from_bits(shared.gain_bits.load(Ordering::Relaxed)));
                queue.render(data, channels);
                shared
                    .frames_played
                    .store(queue.position_frames(), Ordering::Release);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> f64 {
        f64::from(self.sample_rate)
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        let stream = self.stream.as_ref().ok_or(DeviceError::Closed)?;
        stream
            .play()
            .map_err(|e| DeviceError::ResumeFailed(e.to_string()))?;
        log::info!("Audio stream started");
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.shared.frames_played.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&mut self, segment: AudioSegment, start_time: f64) -> Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::Closed);
        }
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(segment, start_time);
        Ok(())
    }

    fn cancel_all(&mut self) {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared
            .gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Failed to pause stream on close: {}", e);
            }
            log::info!("Audio stream closed");
        }
        self.cancel_all();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_prefers_f32_stereo_at_target_rate() {
        let supported = [
            range(2, 44100, 48000, SampleFormat::I16),
            range(1, 8000, 96000, SampleFormat::F32),
            range(2, 8000, 96000, SampleFormat::F32),
        ];
        let config = choose_config(&supported, 48000).unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate, SampleRate(48000));
    }

    #[test]
    fn test_fallback_keeps_f32() {
        let supported = [
            range(2, 44100, 44100, SampleFormat::I16),
            range(1, 22050, 22050, SampleFormat::F32),
        ];
        let config = choose_config(&supported, 48000).unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, SampleRate(22050));
    }

    #[test]
    fn test_integer_only_device_is_rejected() {
        let supported = [range(2, 44100, 48000, SampleFormat::I16)];
        assert!(matches!(
            choose_config(&supported, 48000),
            Err(DeviceError::Config(_))
        ));
    }
}
