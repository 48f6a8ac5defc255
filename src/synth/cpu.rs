//! Host-side sample compute unit.
//!
//! Evaluates synthesis closures on the CPU. Programs are produced by a
//! caller-supplied compiler, which makes this unit usable as a stand-in for
//! the GPU in tests, benchmarks and headless environments.

use std::sync::Arc;

use super::{
    BatchFailure, BatchRequest, BatchResult, CompileError, ProgramInfo, ProgramSource,
    SampleCompute,
};

/// A per-sample synthesis function: time in seconds to `[left, right]`.
pub type SynthFn = Arc<dyn Fn(f64) -> [f32; 2] + Send + Sync>;

type ProgramCompiler = Box<dyn FnMut(&ProgramSource) -> Result<SynthFn, CompileError> + Send>;

/// Default ceiling, matching a 4096x1024 float target.
pub const DEFAULT_CPU_MAX_BATCH: u32 = 4096 * 1024;

/// CPU implementation of [`SampleCompute`].
pub struct CpuSampleUnit {
    compiler: ProgramCompiler,
    program: Option<(SynthFn, ProgramInfo)>,
    generation: u64,
    max_batch_size: u32,
}

impl CpuSampleUnit {
    /// Create a unit that compiles programs with `compiler`.
    pub fn new<F>(compiler: F) -> Self
    where
        F: FnMut(&ProgramSource) -> Result<SynthFn, CompileError> + Send + 'static,
    {
        Self {
            compiler: Box::new(compiler),
            program: None,
            generation: 0,
            max_batch_size: DEFAULT_CPU_MAX_BATCH,
        }
    }

    /// Create a unit that installs `f` for any source it is given.
    pub fn with_program<F>(f: F) -> Self
    where
        F: Fn(f64) -> [f32; 2] + Send + Sync + 'static,
    {
        let f: SynthFn = Arc::new(f);
        Self::new(move |_| Ok(f.clone()))
    }

    /// A unit that always produces silence.
    pub fn silence() -> Self {
        Self::with_program(|_| [0.0, 0.0])
    }

    pub fn with_max_batch_size(mut self, max_batch_size: u32) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Info about the installed program, if any.
    pub fn program_info(&self) -> Option<ProgramInfo> {
        self.program.as_ref().map(|(_, info)| *info)
    }
}

impl SampleCompute for CpuSampleUnit {
    fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    fn configure(&mut self, program: &ProgramSource) -> Result<ProgramInfo, CompileError> {
        let f = (self.compiler)(program)?;
        self.generation += 1;
        let info = ProgramInfo {
            generation: self.generation,
            source_hash: program.hash,
        };
        self.program = Some((f, info));
        Ok(info)
    }

    fn render(&mut self, request: &BatchRequest) -> Result<BatchResult, BatchFailure> {
        let (f, _) = self.program.as_ref().ok_or(BatchFailure::NoProgram)?;
        let count = request.sample_count.min(self.max_batch_size);

        let mut samples = Vec::with_capacity(count as usize * 2);
        for i in 0..u64::from(count) {
            let time = (request.sample_offset + i) as f64 / request.sample_rate;
            let [left, right] = f(time);
            samples.push(left);
            samples.push(right);
        }

        Ok(BatchResult::from_interleaved(request.sample_offset, samples))
    }

    fn backend_name(&self) -> &str {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::CompileStage;

    fn constant_unit() -> CpuSampleUnit {
        CpuSampleUnit::with_program(|_| [1.0, -1.0])
    }

    #[test]
    fn test_render_without_program_fails() {
        let mut unit = constant_unit();
        let result = unit.render(&BatchRequest::new(0, 10, 44100.0));
        assert_eq!(result, Err(BatchFailure::NoProgram));
    }

    #[test]
    fn test_constant_program() {
        let mut unit = constant_unit();
        unit.configure(&ProgramSource::new("const")).unwrap();

        let result = unit.render(&BatchRequest::new(0, 10, 44100.0)).unwrap();
        assert_eq!(result.sample_count, 10);
        let expected: Vec<f32> = (0..10).flat_map(|_| [1.0, -1.0]).collect();
        assert_eq!(result.samples, expected);
    }

    #[test]
    fn test_out_of_range_output_is_clamped() {
        let mut unit = CpuSampleUnit::with_program(|t| [5.0 + t as f32, -7.0]);
        unit.configure(&ProgramSource::new("loud")).unwrap();

        let result = unit.render(&BatchRequest::new(0, 64, 8000.0)).unwrap();
        assert!(result.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_partial_fulfillment() {
        let mut unit = constant_unit().with_max_batch_size(16);
        unit.configure(&ProgramSource::new("const")).unwrap();

        let result = unit.render(&BatchRequest::new(100, 64, 44100.0)).unwrap();
        assert_eq!(result.sample_count, 16);
        assert_eq!(result.sample_offset, 100);
    }

    #[test]
    fn test_time_uses_absolute_sample_index() {
        let mut unit = CpuSampleUnit::with_program(|t| [t as f32, 0.0]);
        unit.configure(&ProgramSource::new("ramp")).unwrap();

        let result = unit.render(&BatchRequest::new(4000, 4, 8000.0)).unwrap();
        assert_eq!(result.frame(0).unwrap()[0], 0.5);
        assert_eq!(result.frame(3).unwrap()[0], (4003.0 / 8000.0) as f32);
    }

    #[test]
    fn test_failed_configure_keeps_previous_program() {
        let mut unit = CpuSampleUnit::new(|src: &ProgramSource| {
            if src.user_code == "bad" {
                Err(CompileError::new(CompileStage::Parse, "unexpected token"))
            } else {
                Ok(Arc::new(|_: f64| [0.5f32, 0.5]) as SynthFn)
            }
        });

        let first = unit.configure(&ProgramSource::new("good")).unwrap();
        let err = unit.configure(&ProgramSource::new("bad")).unwrap_err();
        assert_eq!(err.stage, CompileStage::Parse);
        assert_eq!(unit.program_info(), Some(first));

        let result = unit.render(&BatchRequest::new(0, 2, 44100.0)).unwrap();
        assert_eq!(result.samples, vec![0.5; 4]);
    }

    #[test]
    fn test_generation_increments() {
        let mut unit = CpuSampleUnit::silence();
        let a = unit.configure(&ProgramSource::new("x")).unwrap();
        let b = unit.configure(&ProgramSource::new("x")).unwrap();
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(b.generation, a.generation + 1);
    }
}
