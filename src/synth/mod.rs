//! Synthesis programs and the sample compute seam.
//!
//! This module provides:
//! - The batch data model (`BatchRequest`, `BatchResult`)
//! - The `SampleCompute` trait implemented by the GPU and CPU units
//! - Program templating and install sequencing (`template`, `manager`)
//! - Error types for compilation and batch rendering

pub mod cpu;
pub mod manager;
pub mod template;

use std::fmt;

pub use cpu::{CpuSampleUnit, SynthFn};
pub use manager::{InstallHandle, SynthesisManager};
pub use template::{wrap_user_code, ProgramSource, USER_ENTRY_POINT};

/// A single request for a contiguous run of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRequest {
    /// Absolute index of the first sample since engine start (or last restart).
    pub sample_offset: u64,
    pub sample_count: u32,
    pub sample_rate: f64,
}

impl BatchRequest {
    pub fn new(sample_offset: u64, sample_count: u32, sample_rate: f64) -> Self {
        Self {
            sample_offset,
            sample_count,
            sample_rate,
        }
    }

    /// Time in seconds of the first sample in this batch.
    pub fn start_time(&self) -> f64 {
        self.sample_offset as f64 / self.sample_rate
    }
}

/// Interleaved stereo samples produced for a `BatchRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub sample_offset: u64,
    /// Number of stereo frames actually rendered (may be less than requested).
    pub sample_count: u32,
    /// `2 * sample_count` values, alternating left/right.
    pub samples: Vec<f32>,
}

impl BatchResult {
    /// Build a result from interleaved samples, clamping every value to `[-1, 1]`.
    ///
    /// NaN is mapped to silence.
    pub fn from_interleaved(sample_offset: u64, mut samples: Vec<f32>) -> Self {
        clamp_samples(&mut samples);
        let sample_count = (samples.len() / 2) as u32;
        samples.truncate(sample_count as usize * 2);
        Self {
            sample_offset,
            sample_count,
            samples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Left/right pair at `index` within the batch.
    pub fn frame(&self, index: usize) -> Option<[f32; 2]> {
        let i = index * 2;
        Some([*self.samples.get(i)?, *self.samples.get(i + 1)?])
    }
}

/// Clamp samples in place to `[-1, 1]`, replacing NaN with `0.0`.
pub fn clamp_samples(samples: &mut [f32]) {
    for s in samples {
        *s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
    }
}

/// Identity of an installed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramInfo {
    /// Increments with every successful install on a unit.
    pub generation: u64,
    pub source_hash: u64,
}

/// Stage at which a synthesis program was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    /// User code is not syntactically valid.
    Parse,
    /// User code does not provide the expected entry function.
    Link,
    /// The wrapped program failed semantic validation.
    Validate,
    /// The compute pipeline could not be created.
    Pipeline,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompileStage::Parse => "parse",
            CompileStage::Link => "link",
            CompileStage::Validate => "validate",
            CompileStage::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// A rejected synthesis program. The previously installed program stays active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} error{location}: {message}", location = .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
pub struct CompileError {
    pub stage: CompileStage,
    pub message: String,
    /// Line within the user code, when known.
    pub line: Option<u32>,
}

impl CompileError {
    pub fn new(stage: CompileStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Errors for a single batch. These are transient: the scheduler retries
/// the same offset on the next tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchFailure {
    #[error("No synthesis program installed")]
    NoProgram,
    #[error("GPU read-back failed: {0}")]
    ReadbackFailed(String),
    #[error("GPU allocation failed: {0}")]
    AllocationFailed(String),
    #[error("Batch produced no samples")]
    Empty,
    #[error("Compute worker is no longer running")]
    WorkerGone,
}

/// A compute context able to turn batch requests into samples.
///
/// Implementations are stateless per call apart from the installed program,
/// so rendering the same request twice yields identical output.
pub trait SampleCompute: Send {
    /// Largest batch a single `render` call can produce.
    fn max_batch_size(&self) -> u32;

    /// Compile and install a program. On failure the previous program stays active.
    fn configure(&mut self, program: &ProgramSource) -> Result<ProgramInfo, CompileError>;

    /// Render `min(request.sample_count, max_batch_size())` frames.
    fn render(&mut self, request: &BatchRequest) -> Result<BatchResult, BatchFailure>;

    /// Release device resources. Called once when the compute context shuts down.
    fn release(&mut self) {}

    /// Short human-readable backend name for logging.
    fn backend_name(&self) -> &str;
}

impl SampleCompute for Box<dyn SampleCompute> {
    fn max_batch_size(&self) -> u32 {
        (**self).max_batch_size()
    }

    fn configure(&mut self, program: &ProgramSource) -> Result<ProgramInfo, CompileError> {
        (**self).configure(program)
    }

    fn render(&mut self, request: &BatchRequest) -> Result<BatchResult, BatchFailure> {
        (**self).render(request)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}
