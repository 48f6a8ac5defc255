//! Bind group layout and compute pipeline creation for synthesis programs.

use wgpu::{BindGroupLayout, ComputePipeline, Device, PipelineLayout, ShaderModule};

use crate::synth::template::COMPUTE_ENTRY_POINT;

/// Layouts shared by every synthesis program: a uniform at binding 0 and the
/// output storage buffer at binding 1.
pub struct SynthLayouts {
    pub bind_group: BindGroupLayout,
    pub pipeline: PipelineLayout,
}

impl SynthLayouts {
    pub fn new(device: &Device) -> Self {
        let bind_group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("synth_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("synth_pipeline_layout"),
            bind_group_layouts: &[&bind_group],
            immediate_size: 0,
        });

        Self {
            bind_group,
            pipeline,
        }
    }

    /// Build the compute pipeline for a shader module created from a wrapped program.
    pub fn create_pipeline(&self, device: &Device, shader: &ShaderModule) -> ComputePipeline {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("synth_pipeline"),
            layout: Some(&self.pipeline),
            module: shader,
            entry_point: Some(COMPUTE_ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        })
    }
}
