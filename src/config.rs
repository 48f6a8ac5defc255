//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Where the compute unit runs relative to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    /// Dedicated worker thread.
    #[default]
    Threaded,
    /// Requests execute on the calling thread when sent.
    Inline,
}

/// Errors in engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("Batch duration {batch}s exceeds lookahead window {lookahead}s")]
    BatchLongerThanLookahead { batch: f64, lookahead: f64 },
    #[error("Batch of {requested} samples exceeds the compute limit of {max}")]
    BatchExceedsLimit { requested: u64, max: u32 },
    #[error("Batch duration {0}s yields no samples at this sample rate")]
    EmptyBatch(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Requested device sample rate; the device default when `None`.
    pub sample_rate: Option<u32>,
    /// Audio kept queued ahead of the device clock.
    pub buffer_ahead_seconds: f64,
    /// Target duration of one compute batch.
    pub batch_duration_seconds: f64,
    /// Earliest a new segment may start relative to the device clock.
    pub min_scheduling_latency: f64,
    /// Consecutive batch failures tolerated before playback aborts.
    pub max_consecutive_failures: u32,
    /// Output gain in `[0, 1]`.
    pub initial_volume: f32,
    pub compute_mode: ComputeMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            buffer_ahead_seconds: 0.5,
            batch_duration_seconds: 0.1,
            min_scheduling_latency: 0.01,
            max_consecutive_failures: 8,
            initial_volume: 1.0,
            compute_mode: ComputeMode::Threaded,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Samples per batch at `sample_rate`, before the compute ceiling applies.
    pub fn batch_samples(&self, sample_rate: f64) -> u64 {
        (sample_rate * self.batch_duration_seconds).floor() as u64
    }

    /// The requested sample rate, when the device runs at a different one.
    pub fn rate_mismatch(&self, device_rate: f64) -> Option<u32> {
        self.sample_rate
            .filter(|&requested| (f64::from(requested) - device_rate).abs() >= 0.5)
    }

    /// Check the configuration against the device rate and compute ceiling.
    ///
    /// A batch larger than the compute unit can produce is rejected here
    /// rather than discovered while playing.
    pub fn validate(&self, sample_rate: f64, max_batch_size: u32) -> Result<(), ConfigError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        for (name, value) in [
            ("buffer_ahead_seconds", self.buffer_ahead_seconds),
            ("batch_duration_seconds", self.batch_duration_seconds),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.min_scheduling_latency.is_nan() || self.min_scheduling_latency < 0.0 {
            return Err(ConfigError::NonPositive {
                name: "min_scheduling_latency",
                value: self.min_scheduling_latency,
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::NonPositive {
                name: "max_consecutive_failures",
                value: 0.0,
            });
        }
        if self.batch_duration_seconds > self.buffer_ahead_seconds {
            return Err(ConfigError::BatchLongerThanLookahead {
                batch: self.batch_duration_seconds,
                lookahead: self.buffer_ahead_seconds,
            });
        }

        let requested = self.batch_samples(sample_rate);
        if requested == 0 {
            return Err(ConfigError::EmptyBatch(self.batch_duration_seconds));
        }
        if requested > u64::from(max_batch_size) {
            return Err(ConfigError::BatchExceedsLimit {
                requested,
                max: max_batch_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_ahead_seconds, 0.5);
        assert_eq!(config.batch_duration_seconds, 0.1);
        assert_eq!(config.compute_mode, ComputeMode::Threaded);
        assert!(config.validate(44100.0, 1 << 20).is_ok());
        assert_eq!(config.batch_samples(44100.0), 4410);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "sample_rate": 48000, "compute_mode": "inline" }"#)
                .unwrap();
        assert_eq!(config.sample_rate, Some(48000));
        assert_eq!(config.compute_mode, ComputeMode::Inline);
        assert_eq!(config.max_consecutive_failures, 8);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            buffer_ahead_seconds: 0.25,
            batch_duration_seconds: 0.05,
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(EngineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        let result = EngineConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_batch_exceeding_limit_is_config_error() {
        let config = EngineConfig::default();
        let result = config.validate(44100.0, 4096);
        assert!(matches!(
            result,
            Err(ConfigError::BatchExceedsLimit {
                requested: 4410,
                max: 4096
            })
        ));
    }

    #[test]
    fn test_rejects_bad_durations() {
        let config = EngineConfig {
            batch_duration_seconds: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(44100.0, 1 << 20),
            Err(ConfigError::NonPositive { .. })
        ));

        let config = EngineConfig {
            batch_duration_seconds: 1.0,
            buffer_ahead_seconds: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(44100.0, 1 << 20),
            Err(ConfigError::BatchLongerThanLookahead { .. })
        ));

        let config = EngineConfig {
            batch_duration_seconds: 0.00001,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(8000.0, 1 << 20),
            Err(ConfigError::EmptyBatch(_))
        ));
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        let config = EngineConfig::default();
        assert!(matches!(
            config.validate(0.0, 1 << 20),
            Err(ConfigError::InvalidSampleRate(_))
        ));
    }

    #[test]
    fn test_rate_mismatch() {
        let config = EngineConfig {
            sample_rate: Some(48000),
            ..Default::default()
        };
        assert_eq!(config.rate_mismatch(44100.0), Some(48000));
        assert_eq!(config.rate_mismatch(48000.0), None);
        assert_eq!(EngineConfig::default().rate_mismatch(44100.0), None);
    }
}
