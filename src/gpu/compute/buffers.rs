//! GPU buffers for batch rendering.

use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, Device};

/// Bytes per stereo frame in the output buffer (`vec2<f32>`).
pub const FRAME_BYTES: u64 = 2 * std::mem::size_of::<f32>() as u64;

/// Uniform buffer holding [`super::params::SynthParams`].
pub fn create_params_buffer(device: &Device) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("synth_params"),
        size: std::mem::size_of::<super::params::SynthParams>() as u64,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Output storage buffer, its read-back staging buffer and the bind group
/// tying them to the pipeline layout.
pub struct SampleTarget {
    pub samples: Buffer,
    pub staging: Buffer,
    pub bind_group: BindGroup,
    capacity: u32,
}

impl SampleTarget {
    /// Create a target able to hold `capacity` stereo frames.
    pub fn new(device: &Device, layout: &BindGroupLayout, params: &Buffer, capacity: u32) -> Self {
        let size = u64::from(capacity.max(1)) * FRAME_BYTES;

        let samples = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("synth_samples"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("synth_staging"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("synth_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: samples.as_entire_binding(),
                },
            ],
        });

        Self {
            samples,
            staging,
            bind_group,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
