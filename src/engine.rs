//! Playback controller.
//!
//! [`Engine`] ties the pieces together: it owns the output device, the link
//! to the compute context, the synthesis manager and the lookahead
//! scheduler. The embedding application calls [`Engine::tick`] on a regular
//! cadence (a timer or a frame callback); every other operation is a plain
//! method call on the control thread.
//!
//! # Example
//!
//! ```no_run
//! use phobz_synth::{Engine, EngineConfig, VirtualOutput};
//!
//! let output = VirtualOutput::new(44100.0);
//! let mut engine = Engine::init_gpu(
//!     EngineConfig::default(),
//!     Box::new(output),
//!     "fn main_sound(time: f32) -> vec2<f32> { return vec2<f32>(sin(6.2831853 * 440.0 * time)); }",
//! )?;
//! engine.start()?;
//! loop {
//!     engine.tick()?;
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # Ok::<(), phobz_synth::EngineError>(())
//! ```

use std::time::{Duration, Instant};

use crate::config::{ConfigError, EngineConfig};
use crate::gpu::{GpuContext, GpuError, GpuSampleUnit};
use crate::output::{AudioOutput, AudioSegment, DeviceError};
use crate::scheduler::{Completion, EngineState, LookaheadScheduler, SchedulerError};
use crate::synth::{
    BatchFailure, CompileError, InstallHandle, ProgramInfo, SampleCompute, SynthesisManager,
};
use crate::worker::{ComputeEvent, ComputeLink, ComputeRequest};

/// Errors surfaced by the playback controller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Playback could not start: {0}")]
    Device(#[from] DeviceError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Synthesis program rejected: {0}")]
    Compile(#[from] CompileError),
    #[error("Playback aborted after {attempts} consecutive batch failures (last: {last})")]
    PersistentBatchFailure { attempts: u32, last: BatchFailure },
    #[error("Failed to spawn compute worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("Compute context is no longer available")]
    WorkerUnavailable,
    #[error("Timed out waiting for the compute context")]
    Timeout,
    #[error("Engine has been disposed")]
    Disposed,
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::PersistentFailure { attempts, last } => {
                EngineError::PersistentBatchFailure { attempts, last }
            }
        }
    }
}

/// Transport state visible to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
}

/// What one [`Engine::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickReport {
    /// A batch request was sent to the compute context.
    pub requested: bool,
    /// Segments queued on the output device.
    pub scheduled: usize,
    /// Seconds of audio queued ahead of the device clock.
    pub buffered_ahead: f64,
}

/// GPU-driven procedural audio engine.
pub struct Engine {
    config: EngineConfig,
    output: Box<dyn AudioOutput>,
    link: ComputeLink,
    manager: SynthesisManager,
    scheduler: LookaheadScheduler,
    backend: String,
    volume: f32,
    // Fatal error raised while draining outside of `tick`.
    deferred: Option<EngineError>,
    disposed: bool,
}

impl Engine {
    /// Create an engine around an existing compute unit and output device.
    ///
    /// The initial program is installed like any later one: a compile error
    /// does not fail `init`, it leaves the engine not ready (see
    /// [`Engine::last_compile_error`]).
    pub fn init(
        config: EngineConfig,
        mut output: Box<dyn AudioOutput>,
        unit: Box<dyn SampleCompute>,
        initial_program: &str,
    ) -> Result<Self, EngineError> {
        let sample_rate = output.sample_rate();
        if let Some(requested) = config.rate_mismatch(sample_rate) {
            log::warn!(
                "Requested {}Hz but the output device runs at {}Hz; using the device rate",
                requested,
                sample_rate
            );
        }
        config.validate(sample_rate, unit.max_batch_size())?;

        let (link, info) = ComputeLink::new(config.compute_mode, unit)?;
        let scheduler = LookaheadScheduler::new(&config, sample_rate, info.max_batch_size);

        let volume = sanitize_volume(config.initial_volume);
        output.set_gain(volume);

        log::info!(
            "Engine initialised: {} Hz, {} samples per batch, {:.0}ms lookahead, backend {}",
            sample_rate,
            scheduler.batch_size(),
            config.buffer_ahead_seconds * 1000.0,
            info.backend
        );

        let mut engine = Self {
            config,
            output,
            link,
            manager: SynthesisManager::new(),
            scheduler,
            backend: info.backend,
            volume,
            deferred: None,
            disposed: false,
        };
        // The handle is not needed; the outcome is tracked by the manager.
        drop(engine.set_shader(initial_program));
        Ok(engine)
    }

    /// Create an engine rendering on the default GPU.
    pub fn init_gpu(
        config: EngineConfig,
        output: Box<dyn AudioOutput>,
        initial_program: &str,
    ) -> Result<Self, EngineError> {
        let ctx = pollster::block_on(GpuContext::new())?;
        let unit = GpuSampleUnit::new(&ctx);
        Self::init(config, output, Box::new(unit), initial_program)
    }

    /// Create an engine rendering on the default GPU and playing through the
    /// default system output device.
    #[cfg(feature = "realtime")]
    pub fn init_realtime(config: EngineConfig, initial_program: &str) -> Result<Self, EngineError> {
        let output = crate::output::CpalOutput::open_default(config.sample_rate)?;
        Self::init_gpu(config, Box::new(output), initial_program)
    }

    /// Install a new synthesis program.
    ///
    /// Playback continues with the current program until the new one is
    /// confirmed; sample time is not reset.
    pub fn set_shader(&mut self, user_code: &str) -> InstallHandle {
        let handle = self.manager.install(&mut self.link, user_code);
        self.drain_deferred();
        handle
    }

    /// Install a program and wait for the outcome.
    pub fn set_shader_and_wait(
        &mut self,
        user_code: &str,
        timeout: Duration,
    ) -> Result<ProgramInfo, EngineError> {
        let mut handle = self.set_shader(user_code);
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = handle.try_result() {
                return Ok(result?);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::Timeout);
            }
            self.wait_for_events(remaining)?;
        }
    }

    /// Start or resume playback. A no-op while running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.ensure_live()?;
        if self.scheduler.state().is_running {
            return Ok(());
        }
        self.output.resume()?;
        let now = self.output.current_time();
        self.scheduler.start(now);
        log::info!(
            "Playback started at sample {} (device time {:.3}s)",
            self.scheduler.state().sample_offset,
            now
        );
        Ok(())
    }

    /// Stop playback and drop queued audio. Sample time is kept.
    pub fn stop(&mut self) {
        if !self.scheduler.state().is_running {
            return;
        }
        self.scheduler.stop();
        self.output.cancel_all();
        log::info!(
            "Playback stopped at sample {}",
            self.scheduler.state().sample_offset
        );
    }

    /// Rewind sample time to zero, resuming playback if it was running.
    pub fn restart(&mut self) -> Result<(), EngineError> {
        self.ensure_live()?;
        let was_running = self.scheduler.state().is_running;
        self.stop();
        self.scheduler.reset();
        log::debug!("Sample time reset");
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Set output gain. Values are clamped to `[0, 1]`.
    pub fn set_volume(&mut self, level: f32) {
        self.volume = sanitize_volume(level);
        self.output.set_gain(self.volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Generated time position in seconds.
    ///
    /// This runs ahead of what is audible by up to the lookahead window.
    pub fn current_time(&self) -> f64 {
        self.scheduler.current_time()
    }

    /// Output device clock in seconds.
    pub fn device_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn playback_state(&self) -> PlaybackState {
        if self.scheduler.state().is_running {
            PlaybackState::Running
        } else {
            PlaybackState::Stopped
        }
    }

    pub fn engine_state(&self) -> EngineState {
        *self.scheduler.state()
    }

    /// True once a program has been installed.
    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn active_program(&self) -> Option<ProgramInfo> {
        self.manager.active()
    }

    pub fn last_compile_error(&self) -> Option<&CompileError> {
        self.manager.last_error()
    }

    pub fn sample_rate(&self) -> f64 {
        self.scheduler.sample_rate()
    }

    pub fn batch_size(&self) -> u32 {
        self.scheduler.batch_size()
    }

    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one scheduler step. Never blocks on the compute context.
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        self.ensure_live()?;
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut report = TickReport::default();
        self.drain(&mut report)?;

        let now = self.output.current_time();
        if let Some(request) = self.scheduler.poll(now, self.manager.is_ready()) {
            report.requested = true;
            if let Err(failure) = self.link.send(ComputeRequest::Render(request)) {
                return Err(self.worker_lost(failure));
            }
        }

        self.drain(&mut report)?;
        report.buffered_ahead = self.scheduler.buffered_ahead(self.output.current_time());
        Ok(report)
    }

    /// Block for up to `timeout` until the compute context reports back,
    /// then apply everything it has delivered.
    pub fn wait_for_events(&mut self, timeout: Duration) -> Result<TickReport, EngineError> {
        self.ensure_live()?;
        let mut report = TickReport::default();
        match self.link.wait_next(timeout) {
            Ok(Some(event)) => self.handle_event(event, &mut report)?,
            Ok(None) => {}
            Err(failure) => return Err(self.worker_lost(failure)),
        }
        self.drain(&mut report)?;
        report.buffered_ahead = self.scheduler.buffered_ahead(self.output.current_time());
        Ok(report)
    }

    /// Stop playback, shut down the compute context and close the device.
    /// Later calls return [`EngineError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop();
        self.link.shutdown();
        self.manager.abandon_pending();
        self.output.close();
        self.disposed = true;
        log::info!("Engine disposed");
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        Ok(())
    }

    fn drain_deferred(&mut self) {
        let mut report = TickReport::default();
        if let Err(err) = self.drain(&mut report) {
            self.deferred = Some(err);
        }
    }

    fn drain(&mut self, report: &mut TickReport) -> Result<(), EngineError> {
        loop {
            match self.link.try_next() {
                Ok(Some(event)) => self.handle_event(event, report)?,
                Ok(None) => return Ok(()),
                Err(failure) => return Err(self.worker_lost(failure)),
            }
        }
    }

    /// The compute context is gone: settle the outstanding batch, stop
    /// playback and fail every pending install.
    fn worker_lost(&mut self, failure: BatchFailure) -> EngineError {
        log::error!("Compute context lost: {}", failure);
        if self.scheduler.in_flight().is_some() {
            let _ = self.scheduler.fail(failure);
        }
        self.stop();
        self.manager.abandon_pending();
        EngineError::WorkerUnavailable
    }

    fn handle_event(&mut self, event: ComputeEvent, report: &mut TickReport) -> Result<(), EngineError> {
        match event {
            ComputeEvent::Installed(result) => {
                self.manager.on_installed(result);
                Ok(())
            }
            ComputeEvent::Rendered { request, outcome } => {
                let now = self.output.current_time();
                let step = match outcome {
                    Ok(result) => self
                        .scheduler
                        .complete(&result, now)
                        .map(|completion| (completion, Some(result))),
                    Err(failure) => self.scheduler.fail(failure).map(|completion| (completion, None)),
                };

                match step {
                    Ok((Completion::Scheduled(placement), Some(result))) => {
                        let segment = AudioSegment::from_batch(&result, self.scheduler.sample_rate());
                        if let Err(e) = self.output.schedule(segment, placement.start_time) {
                            log::error!("Failed to queue audio: {}", e);
                            self.stop();
                            return Err(e.into());
                        }
                        log::debug!(
                            "Queued samples {}..{} at {:.3}s",
                            placement.sample_offset,
                            placement.sample_offset + u64::from(placement.sample_count),
                            placement.start_time
                        );
                        report.scheduled += 1;
                        Ok(())
                    }
                    Ok(_) => Ok(()),
                    Err(err) => {
                        log::error!(
                            "Giving up on batch at offset {}: {}",
                            request.sample_offset,
                            err
                        );
                        self.stop();
                        Err(err.into())
                    }
                }
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn sanitize_volume(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}
