//! Headless GPU device acquisition for sample compute.

use std::sync::Arc;
use wgpu::{Adapter, Backends, Device, Instance, PowerPreference, Queue};

use super::compute::max_batch_for_limits;

/// Errors that can occur while acquiring the GPU.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found for backends {0:?}")]
    NoAdapter(Backends),
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Adapter selection for [`GpuContext::with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub backends: Backends,
    pub power_preference: PowerPreference,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            backends: Backends::METAL | Backends::VULKAN | Backends::DX12 | Backends::GL,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

/// Device and queue shared by compute units.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
}

impl GpuContext {
    /// Acquire the default high-performance adapter.
    pub async fn new() -> Result<Self, GpuError> {
        Self::with_options(ContextOptions::default()).await
    }

    /// Acquire an adapter matching `options`.
    ///
    /// The device is requested with the adapter's own limits so batches can
    /// use the full storage binding size the hardware offers.
    pub async fn with_options(options: ContextOptions) -> Result<Self, GpuError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|_| GpuError::NoAdapter(options.backends))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("phobz-synth"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let ctx = Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        };
        let info = ctx.adapter_info();
        log::info!(
            "GPU adapter: {} ({:?}), up to {} samples per batch",
            info.name,
            info.backend,
            ctx.max_batch_size()
        );
        Ok(ctx)
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Largest batch a single dispatch on this device can render.
    pub fn max_batch_size(&self) -> u32 {
        max_batch_for_limits(&self.device.limits())
    }
}
