//! Example: Render a WGSL synthesis program offline on the GPU and save it as WAV.
//!
//! Run with:
//!     cargo run --example export_wav -- [program.wgsl] [output.wav] [seconds]

use anyhow::Context;
use phobz_synth::{render_offline, write_wav, GpuContext, GpuSampleUnit};

const SAMPLE_RATE: u32 = 48000;

const DEFAULT_PROGRAM: &str = "fn main_sound(time: f32) -> vec2<f32> {
    let l = sin(6.2831853 * 261.63 * time);
    let r = sin(6.2831853 * 329.63 * time);
    return 0.25 * vec2<f32>(l, r);
}";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let source = match args.next() {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path))?,
        None => DEFAULT_PROGRAM.to_string(),
    };
    let output = args.next().unwrap_or_else(|| "synth_output.wav".to_string());
    let seconds: f64 = match args.next() {
        Some(s) => s.parse().context("invalid duration")?,
        None => 5.0,
    };

    println!("Phobz Synth - Offline Export");
    println!("============================\n");

    let ctx = pollster::block_on(GpuContext::new())?;
    println!("  GPU: {}", ctx.adapter_info().name);
    let mut unit = GpuSampleUnit::new(&ctx);

    let started = std::time::Instant::now();
    let samples = render_offline(&mut unit, &source, SAMPLE_RATE, seconds, 0.1)?;
    println!(
        "  Rendered {:.1}s in {:.1}ms",
        seconds,
        started.elapsed().as_secs_f64() * 1000.0
    );

    write_wav(&output, &samples, SAMPLE_RATE)?;
    println!("  Saved {}", output);
    Ok(())
}
