//! Lookahead scheduling of compute batches.
//!
//! The scheduler decides when to request a batch (cheap, once per tick) and
//! places completed batches on the device timeline (when the compute context
//! answers). At most one batch is outstanding at a time, which bounds queue
//! growth when the compute side runs slower than real time: the engine falls
//! behind and catches up instead of piling up requests.

use crate::config::EngineConfig;
use crate::synth::{BatchFailure, BatchRequest, BatchResult};

/// Scheduling state, owned and mutated only by [`LookaheadScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineState {
    pub is_running: bool,
    /// Next sample index to request.
    pub sample_offset: u64,
    /// Device time up to which audio has been queued.
    pub scheduled_until_time: f64,
    /// A batch request is outstanding.
    pub generating: bool,
    pub buffer_ahead_seconds: f64,
}

/// Errors raised by the scheduler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Batch rendering failed {attempts} times in a row (last: {last})")]
    PersistentFailure { attempts: u32, last: BatchFailure },
}

/// Where a completed batch lands on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub start_time: f64,
    pub duration: f64,
    pub sample_offset: u64,
    pub sample_count: u32,
}

/// What to do with a batch outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// Queue the batch at this placement.
    Scheduled(Placement),
    /// The outcome belongs to a stopped or rewound timeline; drop it.
    Discarded,
    /// Transient failure; the same offset is requested again next tick.
    Retry,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request: BatchRequest,
    epoch: u64,
}

/// Drives batch generation to keep `buffer_ahead_seconds` of audio queued.
#[derive(Debug)]
pub struct LookaheadScheduler {
    state: EngineState,
    sample_rate: f64,
    batch_size: u32,
    min_scheduling_latency: f64,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    in_flight: Option<InFlight>,
    // Bumped by stop/reset so late completions from an older timeline are dropped.
    epoch: u64,
}

impl LookaheadScheduler {
    pub fn new(config: &EngineConfig, sample_rate: f64, max_batch_size: u32) -> Self {
        let batch_size = config
            .batch_samples(sample_rate)
            .min(u64::from(max_batch_size))
            .max(1) as u32;

        Self {
            state: EngineState {
                is_running: false,
                sample_offset: 0,
                scheduled_until_time: 0.0,
                generating: false,
                buffer_ahead_seconds: config.buffer_ahead_seconds,
            },
            sample_rate,
            batch_size,
            min_scheduling_latency: config.min_scheduling_latency,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            consecutive_failures: 0,
            in_flight: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Samples requested per batch.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Generated time position in seconds. Runs ahead of the audible
    /// position by the lookahead window.
    pub fn current_time(&self) -> f64 {
        self.state.sample_offset as f64 / self.sample_rate
    }

    pub fn buffered_ahead(&self, now: f64) -> f64 {
        self.state.scheduled_until_time - now
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// The outstanding request, if any.
    pub fn in_flight(&self) -> Option<BatchRequest> {
        self.in_flight.map(|f| f.request)
    }

    /// Begin scheduling from the device time `now`. Keeps the sample offset.
    pub fn start(&mut self, now: f64) {
        if self.state.is_running {
            return;
        }
        self.state.is_running = true;
        self.state.scheduled_until_time = now;
        self.consecutive_failures = 0;
    }

    /// Stop scheduling. An outstanding batch will be discarded on arrival.
    pub fn stop(&mut self) {
        if !self.state.is_running {
            return;
        }
        self.state.is_running = false;
        self.epoch += 1;
    }

    /// Rewind sample time to zero. Only valid while stopped.
    pub fn reset(&mut self) {
        debug_assert!(!self.state.is_running);
        self.state.sample_offset = 0;
        self.state.scheduled_until_time = 0.0;
        self.consecutive_failures = 0;
        self.epoch += 1;
    }

    /// Decide whether to request a batch at device time `now`.
    pub fn poll(&mut self, now: f64, program_ready: bool) -> Option<BatchRequest> {
        if !self.state.is_running {
            return None;
        }

        if self.state.scheduled_until_time < now {
            if self.state.sample_offset > 0 {
                log::warn!(
                    "Playback underrun: queue ran dry {:.1}ms ago",
                    (now - self.state.scheduled_until_time) * 1000.0
                );
            }
            self.state.scheduled_until_time = now;
        }

        if self.state.generating || !program_ready {
            return None;
        }
        if self.buffered_ahead(now) >= self.state.buffer_ahead_seconds {
            return None;
        }

        let request = BatchRequest::new(self.state.sample_offset, self.batch_size, self.sample_rate);
        self.state.generating = true;
        self.in_flight = Some(InFlight {
            request,
            epoch: self.epoch,
        });
        log::debug!(
            "Requesting {} samples at offset {}",
            request.sample_count,
            request.sample_offset
        );
        Some(request)
    }

    /// Take the outstanding request. Returns `None` for a stale one.
    fn settle(&mut self) -> Option<BatchRequest> {
        let in_flight = self.in_flight.take();
        self.state.generating = false;
        match in_flight {
            Some(f) if f.epoch == self.epoch && self.state.is_running => Some(f.request),
            Some(_) => {
                log::debug!("Dropping batch from a stopped timeline");
                None
            }
            None => {
                log::warn!("Batch outcome with no request outstanding");
                None
            }
        }
    }

    /// Place a completed batch on the device timeline.
    pub fn complete(&mut self, result: &BatchResult, now: f64) -> Result<Completion, SchedulerError> {
        let Some(request) = self.settle() else {
            return Ok(Completion::Discarded);
        };

        if result.sample_offset != request.sample_offset {
            log::error!(
                "Batch offset mismatch: requested {}, got {}",
                request.sample_offset,
                result.sample_offset
            );
            return Ok(Completion::Discarded);
        }
        if result.is_empty() {
            return self.record_failure(BatchFailure::Empty);
        }

        self.consecutive_failures = 0;

        let duration = f64::from(result.sample_count) / self.sample_rate;
        let start_time = self
            .state
            .scheduled_until_time
            .max(now + self.min_scheduling_latency);
        self.state.scheduled_until_time = start_time + duration;
        self.state.sample_offset += u64::from(result.sample_count);

        Ok(Completion::Scheduled(Placement {
            start_time,
            duration,
            sample_offset: result.sample_offset,
            sample_count: result.sample_count,
        }))
    }

    /// Record a failed batch. The sample offset does not move.
    pub fn fail(&mut self, failure: BatchFailure) -> Result<Completion, SchedulerError> {
        if self.settle().is_none() {
            return Ok(Completion::Discarded);
        }
        self.record_failure(failure)
    }

    fn record_failure(&mut self, failure: BatchFailure) -> Result<Completion, SchedulerError> {
        self.consecutive_failures += 1;
        log::warn!(
            "Batch at offset {} failed ({}/{}): {}",
            self.state.sample_offset,
            self.consecutive_failures,
            self.max_consecutive_failures,
            failure
        );
        if self.consecutive_failures >= self.max_consecutive_failures {
            return Err(SchedulerError::PersistentFailure {
                attempts: self.consecutive_failures,
                last: failure,
            });
        }
        Ok(Completion::Retry)
    }
}
