//! Manually clocked output device.
//!
//! [`VirtualOutput`] behaves like a real device whose clock only moves when
//! told to. The engine owns the device; tests keep a [`VirtualOutputHandle`]
//! to advance time, capture what would have been heard, and inspect what was
//! scheduled.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{AudioOutput, AudioSegment, DeviceError, PlaybackQueue};

/// Record of one `schedule` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub start_time: f64,
    pub frames: usize,
}

#[derive(Debug)]
struct VirtualState {
    queue: PlaybackQueue,
    running: bool,
    closed: bool,
    fail_resume: Option<String>,
    history: Vec<ScheduledSegment>,
    cancel_count: usize,
}

fn lock(state: &Mutex<VirtualState>) -> MutexGuard<'_, VirtualState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output device driven by a [`VirtualOutputHandle`].
#[derive(Debug)]
pub struct VirtualOutput {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                queue: PlaybackQueue::new(sample_rate),
                running: false,
                closed: false,
                fail_resume: None,
                history: Vec::new(),
                cancel_count: 0,
            })),
        }
    }

    pub fn handle(&self) -> VirtualOutputHandle {
        VirtualOutputHandle {
            state: self.state.clone(),
        }
    }
}

impl AudioOutput for VirtualOutput {
    fn sample_rate(&self) -> f64 {
        lock(&self.state).queue.sample_rate()
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DeviceError::Closed);
        }
        if let Some(reason) = state.fail_resume.take() {
            return Err(DeviceError::ResumeFailed(reason));
        }
        state.running = true;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).queue.current_time()
    }

    fn schedule(&mut self, segment: AudioSegment, start_time: f64) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DeviceError::Closed);
        }
        state.history.push(ScheduledSegment {
            start_time,
            frames: segment.frames(),
        });
        state.queue.push(segment, start_time);
        Ok(())
    }

    fn cancel_all(&mut self) {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.cancel_count += 1;
    }

    fn set_gain(&mut self, gain: f32) {
        lock(&self.state).queue.set_gain(gain);
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.running = false;
        state.closed = true;
    }
}

/// Control side of a [`VirtualOutput`].
#[derive(Debug, Clone)]
pub struct VirtualOutputHandle {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutputHandle {
    /// Advance the clock by `frames` and return the rendered interleaved
    /// stereo. A device that is not running stays put and returns nothing.
    pub fn advance_frames(&self, frames: usize) -> Vec<f32> {
        let mut state = lock(&self.state);
        if !state.running {
            return Vec::new();
        }
        let mut out = vec![0.0; frames * 2];
        state.queue.render(&mut out, 2);
        out
    }

    /// Advance the clock by `seconds`, rounded to whole frames.
    pub fn advance(&self, seconds: f64) -> Vec<f32> {
        let sample_rate = lock(&self.state).queue.sample_rate();
        self.advance_frames((seconds * sample_rate).round() as usize)
    }

    pub fn current_time(&self) -> f64 {
        lock(&self.state).queue.current_time()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn gain(&self) -> f32 {
        lock(&self.state).queue.gain()
    }

    /// Every `schedule` call so far, in call order.
    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        lock(&self.state).history.clone()
    }

    /// Segments queued and not yet fully played.
    pub fn pending_segments(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn cancel_count(&self) -> usize {
        lock(&self.state).cancel_count
    }

    /// Make the next `resume` fail with `reason`.
    pub fn fail_next_resume(&self, reason: impl Into<String>) {
        lock(&self.state).fail_resume = Some(reason.into());
    }
}
