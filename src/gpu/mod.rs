//! GPU compute using wgpu.
//!
//! Provides a headless GPU context and the [`GpuSampleUnit`], which renders
//! synthesis programs as compute shaders.

pub mod compute;
pub mod context;

pub use compute::{check_program, GpuSampleUnit};
pub use context::{ContextOptions, GpuContext, GpuError};
