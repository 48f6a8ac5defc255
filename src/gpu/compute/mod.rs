//! Compute shader execution of synthesis programs.
//!
//! Each program is checked with naga, wrapped in the sample boilerplate and
//! compiled into a compute pipeline. A batch is one dispatch writing
//! `vec2<f32>` frames into a storage buffer, copied to a staging buffer and
//! mapped back to the host.

mod buffers;
mod params;
mod pipelines;

pub mod program;
pub mod unit;

pub use program::check_program;
pub use unit::{max_batch_for_limits, GpuSampleUnit};
