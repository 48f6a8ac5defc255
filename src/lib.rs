//! Phobz Synth Core
//!
//! GPU-driven procedural audio: a user-written per-sample synthesis function
//! is compiled to a compute shader, rendered in batches and scheduled
//! gaplessly on an audio output device.
//!
//! # Features
//!
//! - WGSL synthesis programs (`fn main_sound(time: f32) -> vec2<f32>`) checked with naga
//! - Batch rendering via wgpu compute shaders, or on the CPU for headless use
//! - Lookahead scheduling with at most one batch in flight
//! - Hot-swapping programs without resetting sample time
//! - Realtime playback via CPAL (when `realtime` feature is enabled)
//! - Offline rendering to WAV via hound

pub mod config;
pub mod engine;
pub mod export;
pub mod gpu;
pub mod output;
pub mod scheduler;
pub mod synth;
pub mod worker;

// Re-export commonly used types
pub use config::{ComputeMode, ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, PlaybackState, TickReport};
pub use export::{render_offline, write_wav, ExportError};
pub use gpu::{GpuContext, GpuError, GpuSampleUnit};
#[cfg(feature = "realtime")]
pub use output::CpalOutput;
pub use output::{
    AudioOutput, AudioSegment, DeviceError, PlaybackQueue, VirtualOutput, VirtualOutputHandle,
};
pub use scheduler::{EngineState, LookaheadScheduler};
pub use synth::{
    BatchFailure, BatchRequest, BatchResult, CompileError, CompileStage, CpuSampleUnit,
    InstallHandle, ProgramInfo, ProgramSource, SampleCompute, SynthFn,
};
