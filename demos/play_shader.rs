//! Example: Play a WGSL synthesis program through the default audio device.
//!
//! The program file is watched and hot-swapped whenever it changes, without
//! resetting sample time.
//!
//! Run with:
//!     cargo run --example play_shader --features realtime -- [program.wgsl] [seconds] [config.json]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use phobz_synth::{Engine, EngineConfig};

const DEFAULT_PROGRAM: &str = "fn main_sound(time: f32) -> vec2<f32> {
    let env = exp(-4.0 * fract(time * 2.0));
    let v = 0.3 * env * sin(6.2831853 * 220.0 * time);
    return vec2<f32>(v, v);
}";

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let program_path = args.next().map(PathBuf::from);
    let seconds: f64 = match args.next() {
        Some(s) => s.parse().context("invalid duration")?,
        None => 30.0,
    };
    let config = match args.next() {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config {}", path))?,
        None => EngineConfig::default(),
    };

    let source = match &program_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => DEFAULT_PROGRAM.to_string(),
    };

    println!("Phobz Synth - Realtime Playback");
    println!("===============================\n");

    let mut engine = Engine::init_realtime(config, &source)?;
    println!("  Sample rate: {} Hz", engine.sample_rate());
    println!("  Batch: {} samples", engine.batch_size());
    println!("  Backend: {}", engine.backend_name());

    let info = engine.set_shader_and_wait(&source, Duration::from_secs(10))?;
    println!("  Program generation {}\n", info.generation);

    engine.start()?;

    let started = Instant::now();
    let mut last_modified = program_path.as_deref().and_then(modified);
    let mut last_check = Instant::now();

    while started.elapsed().as_secs_f64() < seconds {
        engine.tick()?;

        if let Some(path) = &program_path {
            if last_check.elapsed() >= Duration::from_millis(250) {
                last_check = Instant::now();
                let current = modified(path);
                if current != last_modified {
                    last_modified = current;
                    let code = std::fs::read_to_string(path)?;
                    match engine.set_shader_and_wait(&code, Duration::from_secs(10)) {
                        Ok(info) => println!("Swapped in generation {}", info.generation),
                        Err(e) => println!("Keeping previous program: {}", e),
                    }
                }
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    println!("\nStopped at {:.2}s of generated audio", engine.current_time());
    engine.dispose();
    Ok(())
}
