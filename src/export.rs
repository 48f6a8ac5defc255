//! Offline rendering and WAV export.
//!
//! Drives a compute unit directly, without a device clock, to render a fixed
//! duration of audio as fast as the unit allows.

use std::path::Path;

use crate::synth::{BatchFailure, BatchRequest, CompileError, ProgramSource, SampleCompute};

/// Attempts per batch before the render is abandoned.
const MAX_BATCH_ATTEMPTS: u32 = 3;

/// Errors that can occur during offline rendering or export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Synthesis program rejected: {0}")]
    Compile(#[from] CompileError),
    #[error("Batch at offset {offset} failed: {failure}")]
    Batch { offset: u64, failure: BatchFailure },
    #[error("Invalid render parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Render `duration_seconds` of `user_code` into interleaved stereo.
///
/// Batches are contiguous; a batch that keeps failing or keeps coming back
/// empty aborts the render.
pub fn render_offline(
    unit: &mut dyn SampleCompute,
    user_code: &str,
    sample_rate: u32,
    duration_seconds: f64,
    batch_duration_seconds: f64,
) -> Result<Vec<f32>, ExportError> {
    for (name, value) in [
        ("sample_rate", f64::from(sample_rate)),
        ("duration_seconds", duration_seconds),
        ("batch_duration_seconds", batch_duration_seconds),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(ExportError::InvalidParameter { name, value });
        }
    }

    let program = unit.configure(&ProgramSource::new(user_code))?;
    log::info!(
        "Rendering {:.2}s offline on {} (generation {})",
        duration_seconds,
        unit.backend_name(),
        program.generation
    );

    let rate = f64::from(sample_rate);
    let total = (duration_seconds * rate).round() as u64;
    let batch = ((batch_duration_seconds * rate).floor() as u64)
        .clamp(1, u64::from(unit.max_batch_size().max(1))) as u32;

    let mut samples = Vec::with_capacity(total as usize * 2);
    let mut offset = 0u64;
    while offset < total {
        let count = (total - offset).min(u64::from(batch)) as u32;
        let request = BatchRequest::new(offset, count, rate);

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let failure = match unit.render(&request) {
                Ok(result) if !result.is_empty() => break result,
                Ok(_) => BatchFailure::Empty,
                Err(failure) => failure,
            };
            log::warn!(
                "Offline batch at {} failed (attempt {}/{}): {}",
                offset,
                attempt,
                MAX_BATCH_ATTEMPTS,
                failure
            );
            if attempt >= MAX_BATCH_ATTEMPTS {
                return Err(ExportError::Batch { offset, failure });
            }
        };

        offset += u64::from(result.sample_count);
        samples.extend_from_slice(&result.samples);
    }

    log::debug!("Rendered {} frames", total);
    Ok(samples)
}

/// Write interleaved stereo as a 32-bit float WAV file.
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    interleaved: &[f32],
    sample_rate: u32,
) -> Result<(), ExportError> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for &sample in interleaved {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::info!(
        "Wrote {} frames to {}",
        interleaved.len() / 2,
        path.as_ref().display()
    );
    Ok(())
}
