//! GPU implementation of the sample compute seam.

use std::sync::Arc;

use wgpu::{Buffer, ComputePipeline, Device, Queue};

use super::buffers::{create_params_buffer, SampleTarget, FRAME_BYTES};
use super::params::SynthParams;
use super::pipelines::SynthLayouts;
use super::program::check_program;
use crate::gpu::context::GpuContext;
use crate::synth::template::WORKGROUP_SIZE;
use crate::synth::{
    BatchFailure, BatchRequest, BatchResult, CompileError, CompileStage, ProgramInfo,
    ProgramSource, SampleCompute,
};

/// Largest batch the device can render in one dispatch: bounded by the
/// storage binding size and the 1D workgroup grid.
pub fn max_batch_for_limits(limits: &wgpu::Limits) -> u32 {
    let by_binding = (limits.max_storage_buffer_binding_size as u64)
        .min(limits.max_buffer_size as u64)
        / FRAME_BYTES;
    let by_dispatch =
        limits.max_compute_workgroups_per_dimension as u64 * u64::from(WORKGROUP_SIZE);
    by_binding.min(by_dispatch).min(u64::from(u32::MAX)) as u32
}

/// Renders batches by running the installed program as a compute shader.
pub struct GpuSampleUnit {
    device: Arc<Device>,
    queue: Arc<Queue>,
    layouts: SynthLayouts,
    params: Buffer,
    program: Option<(ComputePipeline, ProgramInfo)>,
    target: Option<SampleTarget>,
    generation: u64,
    max_batch_size: u32,
    adapter_name: String,
}

impl GpuSampleUnit {
    pub fn new(ctx: &GpuContext) -> Self {
        let mut unit = Self::from_device(ctx.device.clone(), ctx.queue.clone());
        unit.adapter_name = ctx.adapter_info().name;
        unit
    }

    pub fn from_device(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        let max_batch_size = max_batch_for_limits(&device.limits());
        let layouts = SynthLayouts::new(&device);
        let params = create_params_buffer(&device);

        log::debug!("GPU sample unit ready (max batch {} frames)", max_batch_size);

        Self {
            device,
            queue,
            layouts,
            params,
            program: None,
            target: None,
            generation: 0,
            max_batch_size,
            adapter_name: "gpu".to_string(),
        }
    }

    /// Create the pipeline for a program that passed the front-end checks.
    fn build_pipeline(&self, program: &ProgramSource) -> Result<ComputePipeline, CompileError> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("synth_shader"),
                source: wgpu::ShaderSource::Wgsl(program.wrapped.as_str().into()),
            });
        let pipeline = self.layouts.create_pipeline(&self.device, &shader);

        match pollster::block_on(scope.pop()) {
            None => Ok(pipeline),
            Some(e) => Err(CompileError::new(CompileStage::Pipeline, e.to_string())),
        }
    }

    /// Reuse the output target unless the batch width changed.
    fn ensure_target(&mut self, frames: u32) {
        let target = match self.target.take() {
            Some(target) if target.capacity() == frames => target,
            _ => {
                log::debug!("Allocating sample target for {} frames", frames);
                SampleTarget::new(
                    &self.device,
                    &self.layouts.bind_group,
                    &self.params,
                    frames,
                )
            }
        };
        self.target = Some(target);
    }

    /// A failed read-back may leave the staging map pending; the next batch
    /// gets a fresh target.
    fn settle_readback(
        &mut self,
        samples: Result<Vec<f32>, BatchFailure>,
    ) -> Result<Vec<f32>, BatchFailure> {
        if samples.is_err() {
            self.target = None;
        }
        samples
    }

    fn read_staging(&self, target: &SampleTarget, frames: u32) -> Result<Vec<f32>, BatchFailure> {
        let size = u64::from(frames) * FRAME_BYTES;
        let slice = target.staging.slice(..size);

        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| BatchFailure::ReadbackFailed(e.to_string()))?;

        rx.recv()
            .map_err(|e| BatchFailure::ReadbackFailed(e.to_string()))?
            .map_err(|e| BatchFailure::ReadbackFailed(format!("{:?}", e)))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        target.staging.unmap();

        Ok(result)
    }
}

impl SampleCompute for GpuSampleUnit {
    fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    fn configure(&mut self, program: &ProgramSource) -> Result<ProgramInfo, CompileError> {
        check_program(program)?;
        let pipeline = self.build_pipeline(program)?;

        self.generation += 1;
        let info = ProgramInfo {
            generation: self.generation,
            source_hash: program.hash,
        };
        self.program = Some((pipeline, info));
        Ok(info)
    }

    fn render(&mut self, request: &BatchRequest) -> Result<BatchResult, BatchFailure> {
        if self.program.is_none() {
            return Err(BatchFailure::NoProgram);
        }
        let frames = request.sample_count.min(self.max_batch_size);
        if frames == 0 {
            return Ok(BatchResult::from_interleaved(request.sample_offset, Vec::new()));
        }

        let params = SynthParams::new(request.sample_offset, frames, request.sample_rate);
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        self.ensure_target(frames);
        let (Some((pipeline, _)), Some(target)) = (&self.program, &self.target) else {
            return Err(BatchFailure::AllocationFailed(
                "sample target unavailable".to_string(),
            ));
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("synth_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("synth_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &target.bind_group, &[]);
            pass.dispatch_workgroups(frames.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(
            &target.samples,
            0,
            &target.staging,
            0,
            u64::from(frames) * FRAME_BYTES,
        );
        self.queue.submit(Some(encoder.finish()));

        let samples = self.read_staging(target, frames);
        let samples = self.settle_readback(samples)?;
        Ok(BatchResult::from_interleaved(request.sample_offset, samples))
    }

    fn release(&mut self) {
        self.program = None;
        self.target = None;
        log::debug!("GPU sample unit released");
    }

    fn backend_name(&self) -> &str {
        &self.adapter_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_batch_from_default_limits() {
        let limits = wgpu::Limits::default();
        let max = max_batch_for_limits(&limits);
        assert!(max > 0);
        assert!(u64::from(max) * FRAME_BYTES <= limits.max_storage_buffer_binding_size as u64);
        assert!(
            u64::from(max)
                <= limits.max_compute_workgroups_per_dimension as u64 * u64::from(WORKGROUP_SIZE)
        );
    }

    #[test]
    fn test_render_without_program() {
        let Ok(ctx) = pollster::block_on(GpuContext::new()) else {
            return;
        };
        let mut unit = GpuSampleUnit::new(&ctx);
        assert_eq!(
            unit.render(&BatchRequest::new(0, 64, 44100.0)),
            Err(BatchFailure::NoProgram)
        );
    }

    const CONSTANT: &str = "fn main_sound(time: f32) -> vec2<f32> {\n    return vec2<f32>(0.5, -0.5);\n}";

    #[test]
    fn test_pipeline_errors_are_captured() {
        let Ok(ctx) = pollster::block_on(GpuContext::new()) else {
            return;
        };
        let unit = GpuSampleUnit::new(&ctx);
        // Skips the front-end checks, so the device itself must reject it.
        let program = ProgramSource::new("fn main_sound(time: f32) -> vec2<f32> {\n    return nope;\n}");
        let err = unit.build_pipeline(&program).unwrap_err();
        assert_eq!(err.stage, CompileStage::Pipeline);
        assert!(unit.build_pipeline(&ProgramSource::new(CONSTANT)).is_ok());
    }

    #[test]
    fn test_failed_readback_discards_target() {
        let Ok(ctx) = pollster::block_on(GpuContext::new()) else {
            return;
        };
        let mut unit = GpuSampleUnit::new(&ctx);
        unit.configure(&ProgramSource::new(CONSTANT)).unwrap();
        unit.render(&BatchRequest::new(0, 64, 44100.0)).unwrap();
        assert!(unit.target.is_some());

        let failure = BatchFailure::ReadbackFailed("device lost".to_string());
        assert_eq!(unit.settle_readback(Err(failure.clone())), Err(failure));
        assert!(unit.target.is_none());

        let result = unit.render(&BatchRequest::new(64, 64, 44100.0)).unwrap();
        assert_eq!(result.sample_count, 64);
        assert_eq!(result.frame(0), Some([0.5, -0.5]));
    }
}
